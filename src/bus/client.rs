use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::error::BusError;
use super::link::{BusLink, BusMessage, ConnectionState, MessageHandler};
use super::topic::join_topic;
use super::transport::{pending_ack, BusTransport, OutboundMessage, QualityOfService};
use crate::config::BusConfig;

/// Tunables of a [`BusClient`]
#[derive(Debug, Clone)]
pub struct BusOptions {
    /// Prefix of every topic this client touches
    pub base_topic: String,
    /// QoS used by [`BusClient::publish_text`]
    pub default_qos: QualityOfService,
    pub connect_timeout: Duration,
    /// Bound on a publish or subscribe acknowledgment
    pub publish_timeout: Duration,
    /// How long `disconnect` waits for the broker to confirm the close
    pub disconnect_grace: Duration,
    /// How often a subscribe loop checks the connection state
    pub subscribe_poll: Duration,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            base_topic: "assistant".to_string(),
            default_qos: QualityOfService::AtLeastOnce,
            connect_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
            disconnect_grace: Duration::from_millis(250),
            subscribe_poll: Duration::from_secs(1),
        }
    }
}

impl From<&BusConfig> for BusOptions {
    fn from(config: &BusConfig) -> Self {
        Self {
            base_topic: config.base_topic.clone(),
            default_qos: config.default_qos,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
            disconnect_grace: Duration::from_millis(config.disconnect_grace_ms),
            subscribe_poll: Duration::from_millis(config.subscribe_poll_ms),
        }
    }
}

/// Async client over a single broker connection
///
/// All methods are meant to be awaited from the cooperative scheduler; they
/// suspend (never block) while the transport's network thread works.
pub struct BusClient {
    transport: Arc<dyn BusTransport>,
    link: Arc<BusLink>,
    options: BusOptions,
    /// Serializes handshakes so only one socket is ever being opened
    connect_gate: Mutex<()>,
}

impl BusClient {
    pub fn new(transport: Arc<dyn BusTransport>, options: BusOptions) -> Self {
        Self {
            transport,
            link: BusLink::new(),
            options,
            connect_gate: Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn options(&self) -> &BusOptions {
        &self.options
    }

    /// Fully-qualified topic for `suffix`
    pub fn topic(&self, suffix: &str) -> String {
        join_topic(&self.options.base_topic, suffix)
    }

    /// Connect to the broker, or return at once if already connected
    pub async fn connect(&self) -> Result<(), BusError> {
        if self.is_connected() {
            return Ok(());
        }

        let _gate = self.connect_gate.lock().await;

        let mut state_rx = self.link.watch_state();
        let current = *state_rx.borrow_and_update();
        match current {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Connecting => {
                debug!("Handshake already in flight, waiting for it");
            }
            ConnectionState::Disconnected => {
                info!(transport = self.transport.name(), "Connecting to broker");
                self.link.take_failure();
                self.transport.open(Arc::clone(&self.link))?;
            }
        }

        let handshake = async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(BusError::Connection("connection state channel closed".to_string()));
                }

                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Connecting => continue,
                    ConnectionState::Disconnected => {
                        let reason = self
                            .link
                            .take_failure()
                            .unwrap_or_else(|| "connection closed during handshake".to_string());
                        return Err(BusError::Connection(reason));
                    }
                }
            }
        };

        match tokio::time::timeout(self.options.connect_timeout, handshake).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = self.options.connect_timeout.as_millis() as u64,
                    "Broker handshake timed out, abandoning connection attempt"
                );
                self.transport.close();

                // Teardown is reported from the network thread; let it land before the gate opens
                let mut state_rx = self.link.watch_state();
                let closed = state_rx.wait_for(|state| *state == ConnectionState::Disconnected);
                if tokio::time::timeout(self.options.disconnect_grace, closed).await.is_err() {
                    warn!("Abandoned handshake was not torn down within the grace period");
                }

                Err(BusError::Timeout {
                    operation: "connect",
                    elapsed_ms: self.options.connect_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Close the connection (best effort, never fails)
    pub async fn disconnect(&self) {
        let mut state_rx = self.link.watch_state();
        if *state_rx.borrow_and_update() == ConnectionState::Disconnected {
            debug!("Already disconnected");
            return;
        }

        info!("Disconnecting from broker");
        self.transport.close();

        let closed = state_rx.wait_for(|state| *state == ConnectionState::Disconnected);
        if tokio::time::timeout(self.options.disconnect_grace, closed).await.is_err() {
            warn!("Broker did not confirm close within the grace period");
        }
    }

    /// Publish `payload` to `<base>/<topic_suffix>` and wait for confirmation
    ///
    /// Connects first when needed; if that fails the message is not sent and
    /// the connection error is returned.
    pub async fn publish(
        &self,
        topic_suffix: &str,
        payload: impl Into<Vec<u8>>,
        qos: QualityOfService,
        retain: bool,
    ) -> Result<(), BusError> {
        if !self.is_connected() {
            self.connect().await?;
        }

        let topic = self.topic(topic_suffix);
        let payload = payload.into();
        debug!(topic = %topic, bytes = payload.len(), ?qos, retain, "Publishing");

        let (ack, pending) = pending_ack();
        self.transport.publish(
            OutboundMessage {
                topic: topic.clone(),
                payload,
                qos,
                retain,
            },
            ack,
        );

        match tokio::time::timeout(self.options.publish_timeout, pending.acknowledged()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => {
                warn!(topic = %topic, reason = %reason, "Publish not confirmed");
                Err(BusError::Publish { topic, reason })
            }
            Err(_) => {
                warn!(topic = %topic, "Publish acknowledgment timed out");
                Err(BusError::Timeout {
                    operation: "publish",
                    elapsed_ms: self.options.publish_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Publish a text payload with the default QoS, not retained
    pub async fn publish_text(&self, topic_suffix: &str, payload: &str) -> Result<(), BusError> {
        self.publish(topic_suffix, payload.as_bytes().to_vec(), self.options.default_qos, false)
            .await
    }

    /// Route messages on `<base>/<topic_suffix>` to `handler` until the
    /// connection leaves `Connected`
    ///
    /// Only one handler is active per client; a later call replaces the
    /// handler of an earlier one that is still running. Fails if the broker
    /// refuses the subscription or does not confirm it in time.
    pub async fn subscribe_loop<F>(&self, topic_suffix: &str, handler: F) -> Result<(), BusError>
    where
        F: Fn(&BusMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if !self.is_connected() {
            self.connect().await?;
        }

        let pattern = self.topic(topic_suffix);
        let handler: MessageHandler = Arc::new(handler);
        let (id, replaced) = self.link.register(&pattern, handler);
        if let Some(previous) = replaced.filter(|previous| *previous != pattern) {
            self.transport.unsubscribe(&previous);
        }

        let _registration = Registration {
            client: self,
            id,
            pattern: pattern.clone(),
        };

        let (ack, pending) = pending_ack();
        self.transport.subscribe(&pattern, ack);
        match tokio::time::timeout(self.options.publish_timeout, pending.acknowledged()).await {
            Ok(Ok(())) => info!(pattern = %pattern, "Subscribed"),
            Ok(Err(reason)) => {
                warn!(pattern = %pattern, reason = %reason, "Subscription refused");
                return Err(BusError::Subscribe { pattern, reason });
            }
            Err(_) => {
                warn!(pattern = %pattern, "Subscribe acknowledgment timed out");
                return Err(BusError::Timeout {
                    operation: "subscribe",
                    elapsed_ms: self.options.publish_timeout.as_millis() as u64,
                });
            }
        }

        let mut ticker = tokio::time::interval(self.options.subscribe_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while self.is_connected() {
            ticker.tick().await;
        }

        info!(pattern = %pattern, "Connection left Connected, ending subscription");
        Ok(())
    }
}

/// Unregisters a subscribe loop's handler however the loop ends
struct Registration<'a> {
    client: &'a BusClient,
    id: u64,
    pattern: String,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.client.link.unregister(self.id) {
            self.client.transport.unsubscribe(&self.pattern);
        } else {
            debug!(pattern = %self.pattern, "Handler was already replaced by a newer subscription");
        }
    }
}
