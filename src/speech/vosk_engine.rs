use std::path::Path;
use tracing::info;

use super::engine::{EngineError, SpeechEngine};

/// Offline recognizer backed by a Vosk/Kaldi model directory
pub struct VoskEngine {
    // Kept alive for as long as the recognizer uses it
    _model: ::vosk::Model,
    recognizer: ::vosk::Recognizer,
}

impl VoskEngine {
    pub fn new(model_path: &Path, sample_rate: u32) -> Result<Self, EngineError> {
        if !model_path.exists() {
            return Err(EngineError::ModelMissing(model_path.to_path_buf()));
        }

        info!("Loading Vosk model from {}", model_path.display());
        let model = ::vosk::Model::new(model_path.to_string_lossy().into_owned())
            .ok_or_else(|| EngineError::ModelLoad(model_path.to_path_buf()))?;
        let recognizer = ::vosk::Recognizer::new(&model, sample_rate as f32)
            .ok_or_else(|| EngineError::Fatal("could not create recognizer".to_string()))?;

        info!(sample_rate, "Vosk recognizer ready");

        Ok(Self {
            _model: model,
            recognizer,
        })
    }
}

impl SpeechEngine for VoskEngine {
    fn accept_frame(&mut self, samples: &[i16]) -> Result<bool, EngineError> {
        match self.recognizer.accept_waveform(samples) {
            ::vosk::DecodingState::Finalized => Ok(true),
            ::vosk::DecodingState::Running => Ok(false),
            ::vosk::DecodingState::Failed => Err(EngineError::Frame("decoding failed".to_string())),
        }
    }

    fn take_result(&mut self) -> String {
        self.recognizer
            .result()
            .single()
            .map(|result| result.text.to_string())
            .unwrap_or_default()
    }

    fn flush(&mut self) -> String {
        self.recognizer
            .final_result()
            .single()
            .map(|result| result.text.to_string())
            .unwrap_or_default()
    }

    fn reset(&mut self) {
        self.recognizer.reset();
    }

    fn name(&self) -> &str {
        "vosk"
    }
}
