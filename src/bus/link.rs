use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::topic::topic_matches;

/// Broker connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Message received from the broker
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl BusMessage {
    /// Payload decoded as UTF-8 (lossy)
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Handler invoked on the network thread for every matching message
pub type MessageHandler = Arc<dyn Fn(&BusMessage) -> anyhow::Result<()> + Send + Sync>;

struct ActiveSubscription {
    id: u64,
    pattern: String,
    handler: MessageHandler,
}

/// Callback surface between a transport's network thread and the client
///
/// The network thread only *sends values* through the link: state changes go
/// into a watch channel and wake whichever tasks wait on it, so no task logic
/// ever runs on the network thread. The one exception is the subscription
/// handler, which is called directly with panics contained.
pub struct BusLink {
    state_tx: watch::Sender<ConnectionState>,
    last_failure: Mutex<Option<String>>,
    subscription: Mutex<Option<ActiveSubscription>>,
    next_subscription_id: AtomicU64,
}

impl BusLink {
    pub fn new() -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Arc::new(Self {
            state_tx,
            last_failure: Mutex::new(None),
            subscription: Mutex::new(None),
            next_subscription_id: AtomicU64::new(1),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every state change from now on
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // Network-thread callbacks
    // ------------------------------------------------------------------

    pub fn on_connecting(&self) {
        debug!("Broker handshake started");
        self.state_tx.send_replace(ConnectionState::Connecting);
    }

    pub fn on_connected(&self) {
        info!("Broker acknowledged connection");
        self.state_tx.send_replace(ConnectionState::Connected);
    }

    pub fn on_connect_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "Broker rejected connection");
        *lock(&self.last_failure) = Some(reason);
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    pub fn on_disconnected(&self, reason: Option<String>) {
        match &reason {
            Some(reason) => warn!(reason = %reason, "Disconnected from broker"),
            None => info!("Disconnected from broker"),
        }
        if let Some(reason) = reason {
            *lock(&self.last_failure) = Some(reason);
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        let handler = {
            let subscription = lock(&self.subscription);
            subscription
                .as_ref()
                .filter(|sub| topic_matches(&sub.pattern, topic))
                .map(|sub| Arc::clone(&sub.handler))
        };

        let Some(handler) = handler else {
            debug!(topic, "No active handler for message");
            return;
        };

        let message = BusMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            received_at: Utc::now(),
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(&message))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(topic, error = %e, "Subscription handler failed"),
            Err(_) => error!(topic, "Subscription handler panicked"),
        }
    }

    // ------------------------------------------------------------------
    // Client-side bookkeeping
    // ------------------------------------------------------------------

    pub(crate) fn take_failure(&self) -> Option<String> {
        lock(&self.last_failure).take()
    }

    /// Install `handler` as the only active subscription.
    ///
    /// Returns the new registration id and the pattern of the registration it
    /// replaced, if any.
    pub(crate) fn register(&self, pattern: &str, handler: MessageHandler) -> (u64, Option<String>) {
        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let previous = lock(&self.subscription).replace(ActiveSubscription {
            id,
            pattern: pattern.to_string(),
            handler,
        });

        if let Some(previous) = &previous {
            info!(old = %previous.pattern, new = %pattern, "Replacing active subscription handler");
        }

        (id, previous.map(|sub| sub.pattern))
    }

    /// Remove registration `id` if it is still the active one
    pub(crate) fn unregister(&self, id: u64) -> bool {
        let mut subscription = lock(&self.subscription);
        if subscription.as_ref().is_some_and(|sub| sub.id == id) {
            *subscription = None;
            true
        } else {
            false
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
