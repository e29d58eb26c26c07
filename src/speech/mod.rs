//! Speech recognition
//!
//! The engine is opaque behind [`SpeechEngine`]; [`RecognizerWorker`] owns it
//! on a dedicated thread and turns the frame stream into finalized utterances.

mod engine;
#[cfg(feature = "vosk")]
mod vosk_engine;
mod worker;

pub use engine::{EngineError, SpeechEngine};
#[cfg(feature = "vosk")]
pub use vosk_engine::VoskEngine;
pub use worker::{RecognizerHandle, RecognizerState, RecognizerStats, RecognizerWorker};

use crate::config::RecognizerConfig;

/// Load the configured engine; a missing model is fatal
pub fn load_engine(config: &RecognizerConfig, sample_rate: u32) -> Result<Box<dyn SpeechEngine>, EngineError> {
    let model_path = config.model_path();
    if !model_path.exists() {
        return Err(EngineError::ModelMissing(model_path));
    }

    #[cfg(feature = "vosk")]
    {
        Ok(Box::new(VoskEngine::new(&model_path, sample_rate)?))
    }

    #[cfg(not(feature = "vosk"))]
    {
        let _ = sample_rate;
        Err(EngineError::Unavailable)
    }
}
