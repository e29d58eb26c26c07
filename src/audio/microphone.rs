//! Microphone capture via `cpal`.
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream is built and
//! kept alive on a dedicated `audio-capture` thread that parks until stopped.
//! The data callback only re-blocks samples and pushes frames; stream status
//! errors are logged and capture carries on.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::block::BlockAssembler;
use super::queue::{FrameSender, PushOutcome};

/// Log one overrun warning per this many dropped frames
const OVERRUN_LOG_INTERVAL: u64 = 50;

/// Errors that can occur while opening the capture stream
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    capturing: Arc<AtomicBool>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            stop_tx: None,
            worker: None,
            capturing: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl AudioBackend for MicrophoneBackend {
    fn start(&mut self, frames: FrameSender) -> Result<()> {
        if self.worker.is_some() {
            warn!("Microphone capture already started");
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), CaptureError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let config = self.config.clone();
        let capturing = Arc::clone(&self.capturing);

        let worker = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(&config, frames) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                capturing.store(true, Ordering::SeqCst);
                let _ = ready_tx.send(Ok(()));

                // Park until stop() is called or the backend is dropped
                let _ = stop_rx.recv();
                drop(stream);
                capturing.store(false, Ordering::SeqCst);
                info!("Microphone capture stopped");
            })
            .context("Failed to spawn capture thread")?;

        let opened = ready_rx
            .recv()
            .context("Capture thread exited before opening the device")?;
        if let Err(e) = opened {
            let _ = worker.join();
            return Err(e).context("Failed to open microphone");
        }

        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);
        info!(
            sample_rate = self.config.sample_rate,
            block_ms = self.config.block_duration_ms,
            "Microphone capture started"
        );

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Capture thread panicked");
            }
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn open_stream(config: &AudioBackendConfig, frames: FrameSender) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    // Prefer native i16; fall back to f32 devices and convert
    let stream = match build_stream::<i16>(&device, &stream_config, config, frames.clone(), |s| s) {
        Ok(stream) => stream,
        Err(cpal::BuildStreamError::StreamConfigNotSupported) => {
            warn!("Device rejected i16 capture, falling back to f32");
            build_stream::<f32>(&device, &stream_config, config, frames, f32_to_i16)?
        }
        Err(e) => return Err(e.into()),
    };

    stream.play()?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    config: &AudioBackendConfig,
    frames: FrameSender,
    convert: fn(T) -> i16,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
{
    let sample_rate = config.sample_rate;
    let mut assembler = BlockAssembler::new(config.block_samples());
    let block_samples = assembler.block_samples();
    // Device buffers are converted one block-sized chunk at a time, so this never regrows
    let mut scratch: Vec<i16> = Vec::with_capacity(block_samples);
    let mut sequence = 0u64;
    let started = Instant::now();

    device.build_input_stream(
        stream_config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for chunk in data.chunks(block_samples) {
                scratch.clear();
                scratch.extend(chunk.iter().map(|&s| convert(s)));

                assembler.push_with(
                    &scratch,
                    || frames.take_buffer(block_samples),
                    |samples| {
                        let frame = AudioFrame {
                            samples,
                            sample_rate,
                            sequence,
                            timestamp_ms: started.elapsed().as_millis() as u64,
                        };
                        sequence += 1;

                        match frames.push(frame) {
                            PushOutcome::Queued | PushOutcome::Closed => {}
                            PushOutcome::Evicted | PushOutcome::Discarded => {
                                let dropped = frames.stats().dropped();
                                if dropped % OVERRUN_LOG_INTERVAL == 1 {
                                    warn!(dropped, "Audio overrun: recognizer is behind, oldest audio dropped");
                                }
                            }
                        }
                    },
                );
            }
        },
        |err: cpal::StreamError| {
            warn!(error = %err, "Audio stream status");
        },
        None,
    )
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
