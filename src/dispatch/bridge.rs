//! Hand-off from worker threads to the cooperative scheduler
//!
//! `submit` is a plain, non-blocking send on an unbounded FIFO. The scheduler
//! drains the other end in its own run loop, so worker threads never touch
//! scheduler-owned state and utterances arrive in submission order.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

/// A finalized utterance; the text is never empty
#[derive(Debug, PartialEq, Eq)]
pub struct UtteranceResult {
    text: String,
    sequence: u64,
    finalized_at: DateTime<Utc>,
}

impl UtteranceResult {
    /// Build a result from raw recognizer text, or `None` if it is blank
    pub fn new(sequence: u64, text: impl AsRef<str>) -> Option<Self> {
        let text = text.as_ref().trim();
        if text.is_empty() {
            return None;
        }

        Some(Self {
            text: text.to_string(),
            sequence,
            finalized_at: Utc::now(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Finalization order within one producer
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn finalized_at(&self) -> DateTime<Utc> {
        self.finalized_at
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("scheduler is not running; utterance #{0} was not delivered")]
    SchedulerUnavailable(u64),
}

/// Create a bridge; submissions queue until the receiver is drained
pub fn dispatch_bridge() -> (DispatchBridge, UtteranceReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DispatchBridge { tx }, UtteranceReceiver { rx })
}

/// Producer side, callable from any thread
#[derive(Debug, Clone)]
pub struct DispatchBridge {
    tx: mpsc::UnboundedSender<UtteranceResult>,
}

impl DispatchBridge {
    /// Queue `utterance` for the scheduler and return immediately
    pub fn submit(&self, utterance: UtteranceResult) -> Result<(), BridgeError> {
        let sequence = utterance.sequence;
        self.tx
            .send(utterance)
            .map_err(|_| BridgeError::SchedulerUnavailable(sequence))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Scheduler side of the bridge
#[derive(Debug)]
pub struct UtteranceReceiver {
    rx: mpsc::UnboundedReceiver<UtteranceResult>,
}

impl UtteranceReceiver {
    /// Next utterance, or `None` once closed and drained
    pub async fn recv(&mut self) -> Option<UtteranceResult> {
        self.rx.recv().await
    }

    /// Refuse new submissions; already queued utterances can still be received
    pub fn close(&mut self) {
        self.rx.close();
    }
}
