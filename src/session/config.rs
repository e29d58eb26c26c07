use std::fmt;
use std::io::BufRead;

use crate::audio::AudioBackend;
use crate::speech::SpeechEngine;

/// Where a session's utterances come from
pub enum SessionInput {
    /// Captured audio decoded by a speech engine
    Audio {
        engine: Box<dyn SpeechEngine>,
        backend: Box<dyn AudioBackend>,
        /// Frame queue bound
        queue_capacity: usize,
    },

    /// One finalized utterance per line, no audio and no engine
    Text(Box<dyn BufRead + Send>),
}

impl SessionInput {
    pub fn describe(&self) -> String {
        match self {
            SessionInput::Audio { engine, backend, .. } => {
                format!("{} audio decoded by {}", backend.name(), engine.name())
            }
            SessionInput::Text(_) => "typed lines".to_string(),
        }
    }
}

impl fmt::Debug for SessionInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
