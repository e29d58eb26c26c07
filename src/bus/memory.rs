//! In-process broker
//!
//! Each [`MemoryTransport`] runs its own network thread, so callbacks reach
//! the client exactly the way a real socket client's would. The broker can be
//! told to reject handshakes or subscriptions, stall, or drop every connection, which makes it
//! the bus of choice for tests and for running without a server.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, warn};

use super::error::BusError;
use super::link::BusLink;
use super::topic::topic_matches;
use super::transport::{AckSender, BusTransport, OutboundMessage, QualityOfService};

/// A message the broker accepted, recorded in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QualityOfService,
    pub retain: bool,
}

enum Command {
    Open(Arc<BusLink>),
    Publish(OutboundMessage, AckSender),
    Subscribe(String, AckSender),
    Unsubscribe(String),
    Deliver { topic: String, payload: Vec<u8> },
    Close,
    Drop(String),
    Shutdown,
}

struct SessionEntry {
    commands: Sender<Command>,
    patterns: Vec<String>,
}

#[derive(Default)]
struct BrokerInner {
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    retained: Mutex<HashMap<String, Vec<u8>>>,
    published: Mutex<Vec<PublishedMessage>>,
    reject_reason: Mutex<Option<String>>,
    reject_subscriptions: Mutex<Option<String>>,
    stalled: AtomicBool,
    opens: AtomicUsize,
    next_session: AtomicU64,
}

impl BrokerInner {
    fn route(&self, message: &OutboundMessage) {
        lock(&self.published).push(PublishedMessage {
            topic: message.topic.clone(),
            payload: String::from_utf8_lossy(&message.payload).into_owned(),
            qos: message.qos,
            retain: message.retain,
        });

        if message.retain {
            let mut retained = lock(&self.retained);
            if message.payload.is_empty() {
                retained.remove(&message.topic);
            } else {
                retained.insert(message.topic.clone(), message.payload.clone());
            }
        }

        for session in lock(&self.sessions).values() {
            if session.patterns.iter().any(|p| topic_matches(p, &message.topic)) {
                let _ = session.commands.send(Command::Deliver {
                    topic: message.topic.clone(),
                    payload: message.payload.clone(),
                });
            }
        }
    }

    fn retained_matching(&self, pattern: &str) -> Vec<(String, Vec<u8>)> {
        lock(&self.retained)
            .iter()
            .filter(|(topic, _)| topic_matches(pattern, topic))
            .map(|(topic, payload)| (topic.clone(), payload.clone()))
            .collect()
    }
}

/// Handle to an in-process broker; clones share the same broker
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client-side transport attached to this broker
    pub fn transport(&self) -> MemoryTransport {
        let id = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        let (commands, rx) = unbounded();

        let session = SessionThread {
            id,
            broker: Arc::clone(&self.inner),
            own_commands: commands.clone(),
            link: None,
            connected: false,
            held_acks: Vec::new(),
        };

        let spawned = thread::Builder::new()
            .name(format!("memory-bus-{}", id))
            .spawn(move || session.run(rx));
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn memory bus thread");
        }

        MemoryTransport { commands }
    }

    /// Reject every following handshake with `reason` (`None` accepts again)
    pub fn reject_handshakes(&self, reason: Option<&str>) {
        *lock(&self.inner.reject_reason) = reason.map(str::to_string);
    }

    /// Refuse every following subscription with `reason` (`None` accepts again)
    pub fn reject_subscriptions(&self, reason: Option<&str>) {
        *lock(&self.inner.reject_subscriptions) = reason.map(str::to_string);
    }

    /// While stalled, handshakes never complete and publishes or
    /// subscriptions are never acknowledged
    pub fn set_stalled(&self, stalled: bool) {
        self.inner.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Sever every live connection, as a network failure would
    pub fn drop_connections(&self, reason: &str) {
        for session in lock(&self.inner.sessions).values() {
            let _ = session.commands.send(Command::Drop(reason.to_string()));
        }
    }

    /// Number of handshakes the broker has seen
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.inner.sessions).len()
    }

    /// Every accepted message, in arrival order
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.inner.published).clone()
    }

    /// Payloads accepted on exactly `topic`
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        lock(&self.inner.published)
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Whether any live connection would receive a message on `topic`
    pub fn has_subscriber(&self, topic: &str) -> bool {
        lock(&self.inner.sessions)
            .values()
            .any(|s| s.patterns.iter().any(|p| topic_matches(p, topic)))
    }
}

/// Client side of a [`MemoryBroker`] connection
pub struct MemoryTransport {
    commands: Sender<Command>,
}

impl BusTransport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(&self, link: Arc<BusLink>) -> Result<(), BusError> {
        self.commands
            .send(Command::Open(link))
            .map_err(|_| BusError::Transport("memory bus thread is gone".to_string()))
    }

    fn publish(&self, message: OutboundMessage, ack: AckSender) {
        // On failure the ack is dropped, which fails the pending publish
        let _ = self.commands.send(Command::Publish(message, ack));
    }

    fn subscribe(&self, pattern: &str, ack: AckSender) {
        let _ = self.commands.send(Command::Subscribe(pattern.to_string(), ack));
    }

    fn unsubscribe(&self, pattern: &str) {
        let _ = self.commands.send(Command::Unsubscribe(pattern.to_string()));
    }

    fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// State owned by one transport's network thread
struct SessionThread {
    id: u64,
    broker: Arc<BrokerInner>,
    own_commands: Sender<Command>,
    link: Option<Arc<BusLink>>,
    connected: bool,
    held_acks: Vec<AckSender>,
}

impl SessionThread {
    fn run(mut self, commands: Receiver<Command>) {
        while let Ok(command) = commands.recv() {
            match command {
                Command::Open(link) => self.open(link),
                Command::Publish(message, ack) => self.publish(message, ack),
                Command::Subscribe(pattern, ack) => self.subscribe(pattern, ack),
                Command::Unsubscribe(pattern) => {
                    if let Some(session) = lock(&self.broker.sessions).get_mut(&self.id) {
                        session.patterns.retain(|p| *p != pattern);
                    }
                }
                Command::Deliver { topic, payload } => {
                    if let (true, Some(link)) = (self.connected, &self.link) {
                        link.on_message(&topic, &payload);
                    }
                }
                Command::Close => self.disconnect(None),
                Command::Drop(reason) => self.disconnect(Some(reason)),
                Command::Shutdown => {
                    self.disconnect(None);
                    break;
                }
            }
        }
        debug!(session = self.id, "Memory bus thread exiting");
    }

    fn open(&mut self, link: Arc<BusLink>) {
        self.broker.opens.fetch_add(1, Ordering::SeqCst);
        link.on_connecting();

        if self.broker.stalled.load(Ordering::SeqCst) {
            self.link = Some(link);
            return;
        }

        let rejection = lock(&self.broker.reject_reason).clone();
        if let Some(reason) = rejection {
            link.on_connect_failed(reason);
            return;
        }

        lock(&self.broker.sessions).insert(
            self.id,
            SessionEntry {
                commands: self.own_commands.clone(),
                patterns: Vec::new(),
            },
        );
        self.connected = true;
        link.on_connected();
        self.link = Some(link);
    }

    fn publish(&mut self, message: OutboundMessage, ack: AckSender) {
        if !self.connected {
            let _ = ack.send(Err("not connected".to_string()));
        } else if self.broker.stalled.load(Ordering::SeqCst) {
            self.held_acks.push(ack);
        } else {
            self.broker.route(&message);
            let _ = ack.send(Ok(()));
        }
    }

    fn subscribe(&mut self, pattern: String, ack: AckSender) {
        if !self.connected {
            let _ = ack.send(Err("not connected".to_string()));
            return;
        }
        if self.broker.stalled.load(Ordering::SeqCst) {
            self.held_acks.push(ack);
            return;
        }
        let rejection = lock(&self.broker.reject_subscriptions).clone();
        if let Some(reason) = rejection {
            let _ = ack.send(Err(reason));
            return;
        }

        if let Some(session) = lock(&self.broker.sessions).get_mut(&self.id) {
            if !session.patterns.contains(&pattern) {
                session.patterns.push(pattern.clone());
            }
        }
        let _ = ack.send(Ok(()));

        if let Some(link) = &self.link {
            for (topic, payload) in self.broker.retained_matching(&pattern) {
                link.on_message(&topic, &payload);
            }
        }
    }

    fn disconnect(&mut self, reason: Option<String>) {
        lock(&self.broker.sessions).remove(&self.id);
        // Unacknowledged operations fail once their senders drop
        self.held_acks.clear();
        self.connected = false;
        if let Some(link) = self.link.take() {
            link.on_disconnected(reason);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
