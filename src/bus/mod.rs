//! Message-bus client
//!
//! [`BusClient`] owns one logical broker connection and exposes an async
//! surface (connect / publish / subscribe loop) to the cooperative scheduler.
//! The network side lives behind [`BusTransport`], which drives its own
//! thread and reports back exclusively through [`BusLink`] callbacks.

pub mod client;
pub mod error;
pub mod link;
pub mod memory;
pub mod nats;
pub mod topic;
pub mod transport;

pub use client::{BusClient, BusOptions};
pub use error::BusError;
pub use link::{BusLink, BusMessage, ConnectionState, MessageHandler};
pub use memory::{MemoryBroker, MemoryTransport, PublishedMessage};
pub use nats::NatsTransport;
pub use transport::{pending_ack, AckSender, BusTransport, OutboundMessage, PendingAck, QualityOfService};
