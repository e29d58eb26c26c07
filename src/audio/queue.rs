//! Bounded frame queue between the capture thread and the recognizer
//!
//! Overflow policy is drop-oldest: capture can never be paused, so when the
//! recognizer falls behind the stalest queued frame is evicted to make room.
//! The queue length never exceeds its capacity.
//!
//! Sample buffers travel back from the recognizer through a spare channel,
//! so steady-state capture reuses a fixed set of allocations.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::backend::AudioFrame;

/// Attempts before an incoming frame is itself discarded
const MAX_PUSH_ATTEMPTS: usize = 3;

/// Counters shared by both ends of a queue
#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl QueueStats {
    /// Frames accepted into the queue
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Frames lost to overruns
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Result of handing a frame to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest frame
    Evicted,
    /// The queue stayed full and the frame itself was discarded
    Discarded,
    /// The recognizer side is gone
    Closed,
}

/// Create a frame queue holding at most `capacity` frames
pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = bounded(capacity);
    // One spare per queued frame plus the block being assembled and the one in flight
    let (spare_tx, spare_rx) = bounded(capacity + 2);
    let stats = Arc::new(QueueStats::default());

    let sender = FrameSender {
        tx,
        evict: rx.clone(),
        spare: spare_rx,
        returned: spare_tx.clone(),
        capacity,
        stats: Arc::clone(&stats),
    };
    let receiver = FrameReceiver {
        rx,
        returned: spare_tx,
        stats,
    };

    (sender, receiver)
}

/// Producer half, used from the capture thread
#[derive(Clone)]
pub struct FrameSender {
    tx: Sender<AudioFrame>,
    /// Used only to discard the head on overflow, never to process frames
    evict: Receiver<AudioFrame>,
    spare: Receiver<Vec<i16>>,
    returned: Sender<Vec<i16>>,
    capacity: usize,
    stats: Arc<QueueStats>,
}

impl FrameSender {
    /// An empty sample buffer, recycled when one is available
    pub fn take_buffer(&self, samples: usize) -> Vec<i16> {
        match self.spare.try_recv() {
            Ok(mut buffer) => {
                buffer.clear();
                buffer.reserve(samples);
                buffer
            }
            Err(_) => Vec::with_capacity(samples),
        }
    }

    /// Enqueue without blocking, evicting the oldest frame when full
    pub fn push(&self, frame: AudioFrame) -> PushOutcome {
        if self.stats.closed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }

        let mut frame = frame;
        let mut evicted = false;
        for _ in 0..MAX_PUSH_ATTEMPTS {
            match self.tx.try_send(frame) {
                Ok(()) => {
                    self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                    return if evicted { PushOutcome::Evicted } else { PushOutcome::Queued };
                }
                Err(TrySendError::Full(rejected)) => {
                    frame = rejected;
                    if let Ok(stale) = self.evict.try_recv() {
                        let _ = self.returned.try_send(stale.samples);
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        evicted = true;
                    }
                }
                Err(TrySendError::Disconnected(_)) => return PushOutcome::Closed,
            }
        }

        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        PushOutcome::Discarded
    }

    /// Enqueue, waiting up to `timeout` for room before falling back to
    /// [`FrameSender::push`]
    ///
    /// For sources that can afford to wait (file replay); live capture uses `push`.
    pub fn push_timeout(&self, frame: AudioFrame, timeout: Duration) -> PushOutcome {
        if self.stats.closed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }

        match self.tx.send_timeout(frame, timeout) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Queued
            }
            Err(SendTimeoutError::Timeout(frame)) => self.push(frame),
            Err(SendTimeoutError::Disconnected(_)) => PushOutcome::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stats.closed.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

/// Consumer half; not `Clone`, so a queue has exactly one consumer
pub struct FrameReceiver {
    rx: Receiver<AudioFrame>,
    returned: Sender<Vec<i16>>,
    stats: Arc<QueueStats>,
}

impl FrameReceiver {
    /// Wait up to `timeout` for the next frame
    ///
    /// Returns `Disconnected` once every sender is gone and the queue is drained.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<AudioFrame, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Hand a processed frame's buffer back to the producer
    ///
    /// Buffers beyond the spare pool's bound are simply freed.
    pub fn recycle(&self, frame: AudioFrame) {
        let _ = self.returned.try_send(frame.samples);
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.stats.closed.store(true, Ordering::Release);
    }
}
