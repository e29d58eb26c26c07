use anyhow::{ensure, Context, Result};
use hound::WavReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::block::BlockAssembler;
use super::queue::{FrameSender, PushOutcome};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .context("Failed to open WAV file")?;

        let spec = reader.spec();
        ensure!(
            spec.bits_per_sample == 16 && spec.sample_format == hound::SampleFormat::Int,
            "Expected 16-bit PCM, got {}-bit {:?}",
            spec.bits_per_sample,
            spec.sample_format
        );

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds = samples.len() as f64 /
            (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Down-mix interleaved channels to mono by averaging
    pub fn to_mono(&self) -> Vec<i16> {
        if self.channels <= 1 {
            return self.samples.clone();
        }

        self.samples
            .chunks_exact(self.channels as usize)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / self.channels as i32) as i16
            })
            .collect()
    }
}

/// Replays a WAV file as if it were being captured
///
/// Without `realtime` the replay runs as fast as the recognizer consumes,
/// waiting for queue room instead of evicting frames.
pub struct FileBackend {
    path: PathBuf,
    config: AudioBackendConfig,
    realtime: bool,
    stop: Arc<AtomicBool>,
    capturing: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, config: AudioBackendConfig, realtime: bool) -> Self {
        Self {
            path: path.into(),
            config,
            realtime,
            stop: Arc::new(AtomicBool::new(false)),
            capturing: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl AudioBackend for FileBackend {
    fn start(&mut self, frames: FrameSender) -> Result<()> {
        ensure!(self.worker.is_none(), "File replay already started");

        let file = AudioFile::open(&self.path)?;
        ensure!(
            file.sample_rate == self.config.sample_rate,
            "{} is {} Hz but capture is configured for {} Hz",
            file.path,
            file.sample_rate,
            self.config.sample_rate
        );

        let samples = file.to_mono();
        let sample_rate = self.config.sample_rate;
        let block_duration = Duration::from_millis(self.config.block_duration_ms);
        let mut assembler = BlockAssembler::new(self.config.block_samples());
        let realtime = self.realtime;
        let stop = Arc::clone(&self.stop);
        let capturing = Arc::clone(&self.capturing);

        self.stop.store(false, Ordering::SeqCst);
        self.capturing.store(true, Ordering::SeqCst);

        let worker = thread::Builder::new()
            .name("audio-replay".to_string())
            .spawn(move || {
                let started = Instant::now();
                let mut blocks = Vec::new();
                assembler.push(&samples, |block| blocks.push(block));
                blocks.extend(assembler.finish());

                for (sequence, block) in blocks.into_iter().enumerate() {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }

                    let sequence = sequence as u64;
                    let frame = AudioFrame {
                        samples: block,
                        sample_rate,
                        sequence,
                        timestamp_ms: sequence * block_duration.as_millis() as u64,
                    };

                    let outcome = if realtime {
                        frames.push(frame)
                    } else {
                        frames.push_timeout(frame, block_duration * 16)
                    };

                    match outcome {
                        PushOutcome::Queued => {}
                        PushOutcome::Evicted | PushOutcome::Discarded => {
                            warn!(sequence, "Recognizer falling behind, audio dropped")
                        }
                        PushOutcome::Closed => {
                            error!("Frame queue closed, ending replay");
                            break;
                        }
                    }

                    if realtime {
                        let due = block_duration * (sequence as u32 + 1);
                        if let Some(wait) = due.checked_sub(started.elapsed()) {
                            thread::sleep(wait);
                        }
                    }
                }

                capturing.store(false, Ordering::SeqCst);
                info!("File replay finished after {:.1}s", started.elapsed().as_secs_f64());
                // `frames` drops here, signalling end of input
            })
            .context("Failed to spawn replay thread")?;

        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Replay thread panicked");
            }
        }
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "file"
    }
}
