use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::error::BusError;
use super::link::BusLink;
use super::topic::{check_subject_safe, from_subject, subject_patterns, to_subject};
use super::transport::{AckSender, BusTransport, OutboundMessage};
use crate::config::BusConfig;

/// Header carrying the retain flag (NATS has no native retained messages)
pub const RETAIN_HEADER: &str = "Assistant-Retain";

/// NATS transport
///
/// `async-nats` runs on a private one-worker runtime (the `bus-net` thread),
/// separate from the cooperative scheduler. Every connection state change is
/// reported from that thread. Connection events are tagged with a generation
/// so callbacks from an abandoned connection are ignored.
pub struct NatsTransport {
    runtime: Option<Runtime>,
    handle: Handle,
    url: String,
    credentials: Option<(String, String)>,
    client_name: String,
    client: Arc<Mutex<Option<async_nats::Client>>>,
    link: Mutex<Option<Arc<BusLink>>>,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
    generation: Arc<AtomicU64>,
}

impl NatsTransport {
    pub fn new(config: &BusConfig) -> Result<Self, BusError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("bus-net")
            .enable_all()
            .build()
            .map_err(|e| BusError::Transport(format!("failed to start network runtime: {}", e)))?;
        let handle = runtime.handle().clone();

        Ok(Self {
            runtime: Some(runtime),
            handle,
            url: config.url(),
            credentials: config.credentials(),
            client_name: format!("voice-assistant-{}", uuid::Uuid::new_v4()),
            client: Arc::new(Mutex::new(None)),
            link: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        })
    }

    fn current_client(&self) -> Option<async_nats::Client> {
        lock(&self.client).clone()
    }
}

impl BusTransport for NatsTransport {
    fn name(&self) -> &str {
        "nats"
    }

    fn open(&self, link: Arc<BusLink>) -> Result<(), BusError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.link) = Some(Arc::clone(&link));

        // A client left from an earlier connection would keep reconnecting in the background
        if lock(&self.client).take().is_some() {
            debug!("Discarding previous NATS client");
        }

        let mut options = async_nats::ConnectOptions::new().name(&self.client_name);
        if let Some((user, password)) = &self.credentials {
            options = options.user_and_password(user.clone(), password.clone());
        }

        let events_link = Arc::clone(&link);
        let events_generation = Arc::clone(&self.generation);
        let events_client = Arc::clone(&self.client);
        options = options.event_callback(move |event| {
            let link = Arc::clone(&events_link);
            let current = Arc::clone(&events_generation);
            let client = Arc::clone(&events_client);
            async move {
                if current.load(Ordering::SeqCst) != generation {
                    return;
                }
                match event {
                    // Initial connect is reported once the client is stored
                    async_nats::Event::Connected if lock(&client).is_some() => link.on_connected(),
                    async_nats::Event::Disconnected => {
                        link.on_disconnected(Some("connection to NATS server lost".to_string()))
                    }
                    other => debug!(event = ?other, "NATS event"),
                }
            }
        });

        info!("Connecting to NATS at {}", self.url);

        let url = self.url.clone();
        let slot = Arc::clone(&self.client);
        let current = Arc::clone(&self.generation);
        self.handle.spawn(async move {
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            link.on_connecting();

            let connected = options.connect(url.as_str()).await;
            if current.load(Ordering::SeqCst) != generation {
                debug!("Dropping outcome of an abandoned handshake");
                return;
            }

            match connected {
                Ok(client) => {
                    *lock(&slot) = Some(client);
                    link.on_connected();
                }
                Err(e) => link.on_connect_failed(e.to_string()),
            }
        });

        Ok(())
    }

    fn publish(&self, message: OutboundMessage, ack: AckSender) {
        if let Err(reason) = check_subject_safe(&message.topic) {
            let _ = ack.send(Err(reason));
            return;
        }
        let Some(client) = self.current_client() else {
            let _ = ack.send(Err("not connected to NATS".to_string()));
            return;
        };

        let subject = to_subject(&message.topic);
        self.handle.spawn(async move {
            let mut headers = async_nats::HeaderMap::new();
            if message.retain {
                headers.insert(RETAIN_HEADER, "true");
            }

            let result = async {
                client
                    .publish_with_headers(subject, headers, message.payload.into())
                    .await
                    .map_err(|e| e.to_string())?;
                if message.qos.requires_ack() {
                    client.flush().await.map_err(|e| e.to_string())?;
                }
                Ok::<(), String>(())
            }
            .await;

            let _ = ack.send(result);
        });
    }

    fn subscribe(&self, pattern: &str, ack: AckSender) {
        if let Err(reason) = check_subject_safe(pattern) {
            let _ = ack.send(Err(reason));
            return;
        }
        let (Some(client), Some(link)) = (self.current_client(), lock(&self.link).clone()) else {
            let _ = ack.send(Err("not connected to NATS".to_string()));
            return;
        };

        let subjects = subject_patterns(pattern);
        let task = self.handle.spawn(async move {
            let mut subscribers = Vec::with_capacity(subjects.len());
            for subject in &subjects {
                match client.subscribe(subject.clone()).await {
                    Ok(subscriber) => subscribers.push(subscriber),
                    Err(e) => {
                        let _ = ack.send(Err(format!("failed to subscribe to {}: {}", subject, e)));
                        return;
                    }
                }
            }

            // The server has processed the SUB once the flush round-trips
            if let Err(e) = client.flush().await {
                let _ = ack.send(Err(format!("subscription not confirmed: {}", e)));
                return;
            }
            let _ = ack.send(Ok(()));

            info!("Subscribed to {}", subjects.join(", "));
            let mut messages = stream::select_all(subscribers);
            while let Some(message) = messages.next().await {
                link.on_message(&from_subject(&message.subject), &message.payload);
            }
            debug!("Subscription to {} ended", subjects.join(", "));
        });

        if let Some(previous) = lock(&self.subscriptions).insert(pattern.to_string(), task) {
            previous.abort();
        }
    }

    fn unsubscribe(&self, pattern: &str) {
        if let Some(task) = lock(&self.subscriptions).remove(pattern) {
            task.abort();
        }
    }

    fn close(&self) {
        // Invalidate callbacks of the current connection before tearing it down
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        for (_, task) in lock(&self.subscriptions).drain() {
            task.abort();
        }

        let client = lock(&self.client).take();
        let link = lock(&self.link).take();
        let current = Arc::clone(&self.generation);
        self.handle.spawn(async move {
            if let Some(client) = client {
                if let Err(e) = client.flush().await {
                    debug!(error = %e, "Flush before close failed");
                }
                // async-nats closes the connection once the last client handle drops
                drop(client);
            }

            if current.load(Ordering::SeqCst) != generation {
                debug!("A newer handshake owns the connection state");
                return;
            }
            if let Some(link) = link {
                link.on_disconnected(None);
            }
        });
    }
}

impl Drop for NatsTransport {
    fn drop(&mut self) {
        // May run inside the scheduler's runtime, where a blocking shutdown panics
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
