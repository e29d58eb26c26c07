use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::error::BusError;
use super::link::BusLink;

/// Delivery guarantee requested for a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityOfService {
    /// Fire and forget: confirmed as soon as the transport accepted the message
    AtMostOnce,
    /// Confirmed only after the broker acknowledged the message
    #[default]
    AtLeastOnce,
}

impl QualityOfService {
    pub fn requires_ack(self) -> bool {
        matches!(self, QualityOfService::AtLeastOnce)
    }
}

/// A message handed to the transport for delivery
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Fully-qualified topic (`<base>/<suffix>`)
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QualityOfService,
    pub retain: bool,
}

/// Completes a [`PendingAck`]; dropping it without sending fails the operation
pub type AckSender = oneshot::Sender<Result<(), String>>;

/// In-flight acknowledgment of one publish or subscribe, owned by the waiting task
#[derive(Debug)]
pub struct PendingAck {
    rx: oneshot::Receiver<Result<(), String>>,
}

impl PendingAck {
    /// Wait for the network side to confirm (or reject) the operation
    pub async fn acknowledged(self) -> Result<(), String> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err("connection dropped before acknowledgment".to_string()),
        }
    }
}

/// Create the two halves of an acknowledgment
pub fn pending_ack() -> (AckSender, PendingAck) {
    let (tx, rx) = oneshot::channel();
    (tx, PendingAck { rx })
}

/// Push-style broker connection driving its own network thread
///
/// Every method must return without waiting on the network. Outcomes are
/// reported later, from the network thread, through the [`BusLink`] handed
/// to [`BusTransport::open`] and through the per-operation [`AckSender`].
pub trait BusTransport: Send + Sync {
    /// Transport name for logging
    fn name(&self) -> &str;

    /// Start a handshake; the link must see `on_connecting` followed by
    /// either `on_connected` or `on_connect_failed`
    fn open(&self, link: Arc<BusLink>) -> Result<(), BusError>;

    /// Hand a message to the network thread
    fn publish(&self, message: OutboundMessage, ack: AckSender);

    /// Start routing messages matching `pattern` to the link; `ack` reports
    /// whether the broker accepted the subscription
    fn subscribe(&self, pattern: &str, ack: AckSender);

    fn unsubscribe(&self, pattern: &str);

    /// Close the connection; the link must eventually see `on_disconnected`,
    /// reported from the network thread once the connection is torn down
    fn close(&self);
}
