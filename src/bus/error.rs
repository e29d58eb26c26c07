use thiserror::Error;

/// Errors surfaced to the task that invoked a bus operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The broker rejected the handshake or the connection closed while connecting
    #[error("connection to broker failed: {0}")]
    Connection(String),

    /// The message was not confirmed by the broker
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// The broker refused the subscription
    #[error("subscribe to {pattern} failed: {reason}")]
    Subscribe { pattern: String, reason: String },

    /// The network side did not answer within the configured bound
    #[error("{operation} timed out after {elapsed_ms} ms")]
    Timeout {
        operation: &'static str,
        elapsed_ms: u64,
    },

    /// The transport could not even start the requested operation
    #[error("transport error: {0}")]
    Transport(String),
}
