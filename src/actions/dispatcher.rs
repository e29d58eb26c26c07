use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::builtin::builtin_actions;
use super::topics;
use crate::bus::BusClient;
use crate::dispatch::{UtteranceReceiver, UtteranceResult};
use crate::intent::{IntentMatcher, Parameters};

/// Handler for one intent
#[async_trait]
pub trait Action: Send + Sync {
    /// Intent name this action is registered under
    fn intent(&self) -> &str;

    async fn execute(&self, bus: &BusClient, parameters: &Parameters) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub utterances: u64,
    pub matched: u64,
    pub unmatched: u64,
    pub unsupported: u64,
    pub action_failures: u64,
}

#[derive(Default)]
struct Counters {
    utterances: AtomicU64,
    matched: AtomicU64,
    unmatched: AtomicU64,
    unsupported: AtomicU64,
    action_failures: AtomicU64,
}

/// Matches utterances and runs the registered actions
///
/// Each utterance is handled by its own task on the scheduler. Tasks are not
/// serialized against each other: publishes are ordered within one task only.
pub struct ActionDispatcher {
    bus: Arc<BusClient>,
    matcher: Box<dyn IntentMatcher>,
    actions: HashMap<String, Box<dyn Action>>,
    counters: Counters,
}

impl ActionDispatcher {
    pub fn new(bus: Arc<BusClient>, matcher: Box<dyn IntentMatcher>) -> Self {
        Self {
            bus,
            matcher,
            actions: HashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Dispatcher with every built-in action registered
    pub fn with_builtin_actions(bus: Arc<BusClient>, matcher: Box<dyn IntentMatcher>) -> Self {
        let mut dispatcher = Self::new(bus, matcher);
        for action in builtin_actions() {
            dispatcher.register(action);
        }
        dispatcher
    }

    /// Register `action`, replacing any action with the same intent name
    pub fn register(&mut self, action: Box<dyn Action>) {
        let intent = action.intent().to_string();
        if self.actions.insert(intent.clone(), action).is_some() {
            debug!(intent = %intent, "Replaced registered action");
        }
    }

    pub fn bus(&self) -> &Arc<BusClient> {
        &self.bus
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            utterances: self.counters.utterances.load(Ordering::Relaxed),
            matched: self.counters.matched.load(Ordering::Relaxed),
            unmatched: self.counters.unmatched.load(Ordering::Relaxed),
            unsupported: self.counters.unsupported.load(Ordering::Relaxed),
            action_failures: self.counters.action_failures.load(Ordering::Relaxed),
        }
    }

    /// Scheduler run loop: one handling task per utterance, spawned in arrival order
    ///
    /// Returns once the bridge is closed and drained and every handling task
    /// has finished. A `shutdown` signal closes the bridge; utterances already
    /// queued are still handled.
    pub async fn run(
        self: Arc<Self>,
        mut utterances: UtteranceReceiver,
        mut shutdown: oneshot::Receiver<()>,
    ) -> DispatchStats {
        info!("Dispatcher running");

        let mut tasks = JoinSet::new();
        let mut draining = false;

        loop {
            tokio::select! {
                _ = &mut shutdown, if !draining => {
                    debug!("Shutdown requested, draining queued utterances");
                    draining = true;
                    utterances.close();
                }
                next = utterances.recv() => match next {
                    Some(utterance) => {
                        let dispatcher = Arc::clone(&self);
                        tasks.spawn(async move { dispatcher.handle_utterance(utterance).await });
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => Self::reap(joined),
            }
        }

        while let Some(joined) = tasks.join_next().await {
            Self::reap(joined);
        }

        let stats = self.stats();
        info!(
            utterances = stats.utterances,
            matched = stats.matched,
            unmatched = stats.unmatched,
            "Dispatcher stopped"
        );
        stats
    }

    /// Match `utterance` and run the resulting intent
    pub async fn handle_utterance(&self, utterance: UtteranceResult) {
        self.counters.utterances.fetch_add(1, Ordering::Relaxed);
        debug!(sequence = utterance.sequence(), text = utterance.text(), "Handling utterance");

        match self.matcher.match_text(utterance.text()) {
            Some(intent) => {
                self.counters.matched.fetch_add(1, Ordering::Relaxed);
                info!(intent = %intent.name, parameters = ?intent.parameters, "Intent matched");
                self.handle(&intent.name, &intent.parameters).await;
            }
            None => {
                self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
                warn!(text = utterance.text(), "No intent matched");
                self.report_warning(&format!("Unrecognized command: {}", utterance.text()))
                    .await;
            }
        }
    }

    /// Run the action registered for `intent_name`
    ///
    /// Never fails: unknown intents and action errors are logged and reported
    /// on the warning topic.
    pub async fn handle(&self, intent_name: &str, parameters: &Parameters) {
        let Some(action) = self.actions.get(intent_name) else {
            self.counters.unsupported.fetch_add(1, Ordering::Relaxed);
            warn!(intent = intent_name, "No action registered for intent");
            self.report_warning(&format!("Unsupported intent: {}", intent_name)).await;
            return;
        };

        if let Err(e) = action.execute(&self.bus, parameters).await {
            self.counters.action_failures.fetch_add(1, Ordering::Relaxed);
            error!(intent = intent_name, error = %e, "Action failed");
            self.report_warning(&format!("Action {} failed: {}", intent_name, e)).await;
        }
    }

    async fn report_warning(&self, message: &str) {
        if let Err(e) = self.bus.publish_text(topics::LOG_WARN, message).await {
            warn!(error = %e, "Could not publish warning to the bus");
        }
    }

    fn reap(joined: Result<(), JoinError>) {
        if let Err(e) = joined {
            error!(error = %e, "Utterance handling task panicked");
        }
    }
}
