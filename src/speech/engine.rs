use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("speech model not found at {0}")]
    ModelMissing(PathBuf),

    #[error("failed to load speech model from {0}")]
    ModelLoad(PathBuf),

    #[error("no speech engine compiled in (enable the `vosk` feature)")]
    Unavailable,

    /// The decoder rejected one frame; the stream itself is still usable
    #[error("decoder rejected frame: {0}")]
    Frame(String),

    #[error("speech engine failed: {0}")]
    Fatal(String),
}

impl EngineError {
    /// Whether the whole pipeline has to stop
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::Frame(_))
    }
}

/// Streaming speech recognizer
///
/// Owned by exactly one recognizer thread; implementations need `Send` but
/// never `Sync`.
pub trait SpeechEngine: Send {
    /// Feed one frame; `true` means an utterance just finalized
    fn accept_frame(&mut self, samples: &[i16]) -> Result<bool, EngineError>;

    /// Text of the utterance that just finalized
    fn take_result(&mut self) -> String;

    /// Force out whatever utterance is still in progress (end of input)
    fn flush(&mut self) -> String;

    /// Drop any partial utterance state
    fn reset(&mut self) {}

    fn name(&self) -> &str;
}
