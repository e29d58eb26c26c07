use anyhow::{anyhow, Context, Result};
use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::engine::{EngineError, SpeechEngine};
use crate::audio::{AudioFrame, FrameReceiver};
use crate::dispatch::{DispatchBridge, UtteranceResult};

/// How long a dequeue waits before re-checking for a stop request
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Per-utterance state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecognizerState {
    Listening,
    Accumulating,
    Finalized,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecognizerStats {
    pub frames_decoded: u64,
    pub frames_skipped: u64,
    pub utterances: u64,
    pub empty_discarded: u64,
    pub bridge_rejected: u64,
}

/// The single thread that owns the speech engine
pub struct RecognizerWorker {
    engine: Box<dyn SpeechEngine>,
    frames: FrameReceiver,
    bridge: DispatchBridge,
    state: RecognizerState,
    stats: RecognizerStats,
    next_sequence: u64,
}

impl RecognizerWorker {
    /// Start the `recognizer` thread
    ///
    /// Takes the queue's only receiver, so a queue can feed one worker at most.
    pub fn spawn(
        engine: Box<dyn SpeechEngine>,
        frames: FrameReceiver,
        bridge: DispatchBridge,
    ) -> Result<RecognizerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = oneshot::channel();

        let worker = Self {
            engine,
            frames,
            bridge,
            state: RecognizerState::Listening,
            stats: RecognizerStats::default(),
            next_sequence: 0,
        };

        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("recognizer".to_string())
            .spawn(move || {
                let outcome = worker.run(&thread_stop);
                let _ = done_tx.send(());
                outcome
            })
            .context("Failed to spawn recognizer thread")?;

        Ok(RecognizerHandle {
            stop,
            thread: Some(thread),
            done: Some(done_rx),
        })
    }

    fn run(mut self, stop: &AtomicBool) -> Result<RecognizerStats, EngineError> {
        info!(engine = self.engine.name(), "Recognizer started");

        loop {
            if stop.load(Ordering::SeqCst) {
                debug!("Stop requested");
                break;
            }

            match self.frames.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => self.process_frame(frame)?,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Audio input ended, flushing decoder");
                    let text = self.engine.flush();
                    self.finalize(text);
                    break;
                }
            }
        }

        info!(
            frames = self.stats.frames_decoded,
            skipped = self.stats.frames_skipped,
            utterances = self.stats.utterances,
            "Recognizer stopped"
        );

        Ok(self.stats)
    }

    fn process_frame(&mut self, frame: AudioFrame) -> Result<(), EngineError> {
        let outcome = self.engine.accept_frame(&frame.samples);
        let sequence = frame.sequence;
        self.frames.recycle(frame);

        match outcome {
            Ok(finalized) => {
                self.stats.frames_decoded += 1;
                if self.state == RecognizerState::Listening {
                    self.transition(RecognizerState::Accumulating);
                }
                if finalized {
                    self.transition(RecognizerState::Finalized);
                    let text = self.engine.take_result();
                    self.finalize(text);
                }
                Ok(())
            }
            Err(e) if !e.is_fatal() => {
                self.stats.frames_skipped += 1;
                warn!(sequence, error = %e, "Skipping undecodable frame");
                Ok(())
            }
            Err(e) => {
                error!(sequence, error = %e, "Speech engine failed");
                Err(e)
            }
        }
    }

    /// Hand non-empty text to the bridge and go back to listening
    fn finalize(&mut self, text: String) {
        match UtteranceResult::new(self.next_sequence, &text) {
            Some(utterance) => {
                self.next_sequence += 1;
                info!(sequence = utterance.sequence(), text = utterance.text(), "Utterance finalized");
                match self.bridge.submit(utterance) {
                    Ok(()) => self.stats.utterances += 1,
                    Err(e) => {
                        self.stats.bridge_rejected += 1;
                        error!(error = %e, "Could not hand utterance to the scheduler");
                    }
                }
            }
            None => {
                self.stats.empty_discarded += 1;
                debug!("Discarding empty utterance");
            }
        }
        self.transition(RecognizerState::Listening);
    }

    fn transition(&mut self, next: RecognizerState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Recognizer state");
            self.state = next;
        }
    }
}

/// Control handle for a running [`RecognizerWorker`]
pub struct RecognizerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<RecognizerStats, EngineError>>>,
    done: Option<oneshot::Receiver<()>>,
}

impl RecognizerHandle {
    /// Ask the worker to exit after the frame it is processing
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Resolve once the worker thread has exited, for whatever reason
    pub async fn finished(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.await;
        }
    }

    /// Wait for the thread and return its statistics or its fatal error
    ///
    /// Blocks; call it after [`RecognizerHandle::finished`] or from a blocking context.
    pub fn join(mut self) -> Result<RecognizerStats> {
        let thread = self
            .thread
            .take()
            .ok_or_else(|| anyhow!("Recognizer already joined"))?;

        match thread.join() {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(e)) => Err(e).context("Recognizer aborted"),
            Err(_) => Err(anyhow!("Recognizer thread panicked")),
        }
    }
}
