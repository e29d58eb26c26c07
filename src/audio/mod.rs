pub mod backend;
pub mod block;
pub mod file;
#[cfg(feature = "microphone")]
pub mod microphone;
pub mod queue;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use block::BlockAssembler;
pub use file::{AudioFile, FileBackend};
#[cfg(feature = "microphone")]
pub use microphone::{CaptureError, MicrophoneBackend};
pub use queue::{frame_queue, FrameReceiver, FrameSender, PushOutcome, QueueStats};
