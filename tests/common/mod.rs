// Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use voice_assistant::bus::{BusClient, BusOptions, MemoryBroker};
use voice_assistant::speech::{EngineError, SpeechEngine};

/// What the scripted engine does with the next frame
pub enum Step {
    /// Keep accumulating
    Partial,
    /// Finalize an utterance with this text
    Final(&'static str),
    /// Reject the frame
    Fail(EngineError),
}

/// Speech engine that replays a fixed script, one step per frame
pub struct ScriptedEngine {
    steps: VecDeque<Step>,
    result: String,
    trailing: String,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            result: String::new(),
            trailing: String::new(),
        }
    }

    /// Text returned by `flush` at end of input
    pub fn with_trailing(mut self, text: &str) -> Self {
        self.trailing = text.to_string();
        self
    }
}

impl SpeechEngine for ScriptedEngine {
    fn accept_frame(&mut self, _samples: &[i16]) -> Result<bool, EngineError> {
        match self.steps.pop_front() {
            Some(Step::Final(text)) => {
                self.result = text.to_string();
                Ok(true)
            }
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Partial) | None => Ok(false),
        }
    }

    fn take_result(&mut self) -> String {
        std::mem::take(&mut self.result)
    }

    fn flush(&mut self) -> String {
        std::mem::take(&mut self.trailing)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn test_bus(broker: &MemoryBroker) -> Arc<BusClient> {
    let options = BusOptions {
        connect_timeout: Duration::from_millis(200),
        publish_timeout: Duration::from_millis(200),
        disconnect_grace: Duration::from_millis(200),
        subscribe_poll: Duration::from_millis(20),
        ..BusOptions::default()
    };
    Arc::new(BusClient::new(Arc::new(broker.transport()), options))
}
