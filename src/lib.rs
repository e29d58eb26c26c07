pub mod actions;
pub mod audio;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod intent;
pub mod session;
pub mod speech;

pub use actions::{Action, ActionDispatcher, DispatchStats};
pub use audio::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSource};
pub use bus::{BusClient, BusError, BusOptions, ConnectionState, MemoryBroker, NatsTransport, QualityOfService};
pub use config::Config;
pub use dispatch::{dispatch_bridge, DispatchBridge, UtteranceResult};
pub use intent::{Intent, IntentMatcher, RuleMatcher};
pub use session::{AssistantSession, SessionInput, SessionStats};
pub use speech::{load_engine, EngineError, SpeechEngine};
