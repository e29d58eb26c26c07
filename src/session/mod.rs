//! Assistant session management
//!
//! `AssistantSession` wires the whole pipeline together:
//! - Bus connection and the dispatcher run loop on the scheduler
//! - Recognizer worker thread fed by the frame queue
//! - Audio backend, or a line reader for typed utterances
//! - Session statistics on shutdown

mod config;
mod session;
mod stats;

pub use config::SessionInput;
pub use session::AssistantSession;
pub use stats::SessionStats;
