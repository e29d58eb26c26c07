use super::config::SessionInput;
use super::stats::SessionStats;
use crate::actions::{ActionDispatcher, DispatchStats};
use crate::audio::{frame_queue, AudioBackend, QueueStats};
use crate::bus::BusClient;
use crate::dispatch::{dispatch_bridge, DispatchBridge, UtteranceResult};
use crate::speech::{RecognizerHandle, RecognizerStats, RecognizerWorker};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Pieces of a running pipeline, torn down by [`AssistantSession::stop`]
struct Pipeline {
    backend: Option<Box<dyn AudioBackend>>,
    recognizer: Option<RecognizerHandle>,
    queue_stats: Option<Arc<QueueStats>>,
    reader_done: Option<oneshot::Receiver<()>>,
    dispatcher_shutdown: oneshot::Sender<()>,
    dispatcher_task: JoinHandle<DispatchStats>,
}

/// A running assistant: audio or typed input in, bus messages out
pub struct AssistantSession {
    /// Shared with the dispatcher and its handling tasks
    bus: Arc<BusClient>,

    dispatcher: Arc<ActionDispatcher>,

    /// When the session started
    started_at: DateTime<Utc>,

    pipeline: Option<Pipeline>,
}

impl AssistantSession {
    pub fn new(dispatcher: ActionDispatcher) -> Self {
        Self {
            bus: Arc::clone(dispatcher.bus()),
            dispatcher: Arc::new(dispatcher),
            started_at: Utc::now(),
            pipeline: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Start the pipeline
    ///
    /// Must be called from inside the scheduler runtime: the dispatcher run
    /// loop is spawned onto it before any producer starts.
    pub async fn start(&mut self, input: SessionInput) -> Result<()> {
        if self.pipeline.is_some() {
            bail!("Session already started");
        }

        info!("Starting assistant session ({})", input.describe());
        self.started_at = Utc::now();

        self.bus
            .connect()
            .await
            .context("Failed to connect to the message bus")?;

        let (bridge, utterances) = dispatch_bridge();
        let (dispatcher_shutdown, shutdown_rx) = oneshot::channel();
        let dispatcher_task = tokio::spawn(Arc::clone(&self.dispatcher).run(utterances, shutdown_rx));

        let mut pipeline = Pipeline {
            backend: None,
            recognizer: None,
            queue_stats: None,
            reader_done: None,
            dispatcher_shutdown,
            dispatcher_task,
        };

        let started = match input {
            SessionInput::Audio {
                engine,
                mut backend,
                queue_capacity,
            } => {
                let (frames_tx, frames_rx) = frame_queue(queue_capacity);
                pipeline.queue_stats = Some(frames_tx.stats());

                match RecognizerWorker::spawn(engine, frames_rx, bridge) {
                    Ok(recognizer) => {
                        pipeline.recognizer = Some(recognizer);
                        let started = backend.start(frames_tx).context("Failed to start audio capture");
                        pipeline.backend = Some(backend);
                        started
                    }
                    Err(e) => Err(e),
                }
            }
            SessionInput::Text(lines) => {
                let (done_tx, done_rx) = oneshot::channel();
                pipeline.reader_done = Some(done_rx);
                Self::spawn_reader(lines, bridge, done_tx)
            }
        };

        self.pipeline = Some(pipeline);

        if let Err(e) = started {
            error!("Session failed to start: {:#}", e);
            if let Err(cleanup) = self.stop().await {
                warn!("Cleanup after failed start: {:#}", cleanup);
            }
            return Err(e);
        }

        info!("Assistant session started");
        Ok(())
    }

    /// Resolve once the input is exhausted or the recognizer exits
    ///
    /// For live capture this only happens on a fatal recognizer error;
    /// callers race it against their own stop signal.
    pub async fn wait(&mut self) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };

        if let Some(recognizer) = pipeline.recognizer.as_mut() {
            recognizer.finished().await;
        } else if let Some(reader_done) = pipeline.reader_done.take() {
            let _ = reader_done.await;
        }
    }

    /// Stop the pipeline and return the final statistics
    ///
    /// Every stage is torn down even if an earlier one failed; a fatal
    /// recognizer error is returned after cleanup.
    pub async fn stop(&mut self) -> Result<SessionStats> {
        let Some(mut pipeline) = self.pipeline.take() else {
            bail!("Session not running");
        };

        info!("Stopping assistant session");

        if let Some(backend) = pipeline.backend.as_mut() {
            if let Err(e) = backend.stop() {
                error!("Failed to stop audio backend: {:#}", e);
            }
        }

        let mut failure = None;
        let mut recognizer_stats: Option<RecognizerStats> = None;
        if let Some(recognizer) = pipeline.recognizer.take() {
            recognizer.stop();
            let joined = tokio::task::spawn_blocking(move || recognizer.join())
                .await
                .map_err(|e| anyhow!("Recognizer join task failed: {}", e))
                .and_then(|stats| stats);
            match joined {
                Ok(stats) => recognizer_stats = Some(stats),
                Err(e) => failure = Some(e),
            }
        }

        // The run loop may already be gone if every producer finished
        let _ = pipeline.dispatcher_shutdown.send(());
        let dispatch = match pipeline.dispatcher_task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Dispatcher task panicked: {}", e);
                self.dispatcher.stats()
            }
        };

        self.bus.disconnect().await;

        let (frames_captured, frames_dropped) = pipeline
            .queue_stats
            .map_or((0, 0), |stats| (stats.enqueued(), stats.dropped()));

        let duration = Utc::now().signed_duration_since(self.started_at);
        let stats = SessionStats {
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_captured,
            frames_dropped,
            recognizer: recognizer_stats,
            dispatch,
        };

        if frames_dropped > 0 {
            warn!("{} audio frames dropped during the session", frames_dropped);
        }
        info!("Assistant session stopped");

        match failure {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    /// Treat each non-blank line as a finalized utterance
    ///
    /// The reader thread is detached: a blocking read cannot be interrupted,
    /// and once the bridge is closed its submissions are simply refused.
    fn spawn_reader(
        lines: Box<dyn BufRead + Send>,
        bridge: DispatchBridge,
        done: oneshot::Sender<()>,
    ) -> Result<()> {
        thread::Builder::new()
            .name("line-reader".to_string())
            .spawn(move || {
                let mut sequence = 0;
                for line in lines.lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            error!("Failed to read input: {}", e);
                            break;
                        }
                    };

                    let Some(utterance) = UtteranceResult::new(sequence, &line) else {
                        continue;
                    };
                    sequence += 1;

                    if let Err(e) = bridge.submit(utterance) {
                        warn!("{}", e);
                        break;
                    }
                }

                info!("Input exhausted after {} utterances", sequence);
                let _ = done.send(());
            })
            .context("Failed to spawn line reader thread")?;

        Ok(())
    }
}
