use anyhow::Result;
use std::path::PathBuf;

use super::queue::FrameSender;

/// One captured block of audio (16-bit PCM, mono)
///
/// Frames are moved through the frame queue and consumed exactly once, so the
/// type is deliberately not `Clone`.
#[derive(Debug)]
pub struct AudioFrame {
    /// Exactly `sample_rate * block_duration` samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Capture order, starting at 0 for each backend start
    pub sequence: u64,
    /// Milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Length of one block in milliseconds
    pub block_duration_ms: u64,
}

impl AudioBackendConfig {
    /// Samples per block
    pub fn block_samples(&self) -> usize {
        (self.sample_rate as u64 * self.block_duration_ms / 1000) as usize
    }
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,     // 16kHz for speech models
            block_duration_ms: 60,  // 60ms blocks
        }
    }
}

impl From<&crate::config::AudioConfig> for AudioBackendConfig {
    fn from(config: &crate::config::AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            block_duration_ms: config.block_ms,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations run capture on their own thread and only ever hand frames
/// to the [`FrameSender`], which never blocks the capture path for long.
/// Dropping every `FrameSender` tells the recognizer the input has ended.
pub trait AudioBackend: Send {
    /// Start capturing audio into `frames`
    ///
    /// Fails if the device or file cannot be opened at all.
    fn start(&mut self, frames: FrameSender) -> Result<()>;

    /// Stop capturing audio
    fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on source and configuration
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "microphone")]
                {
                    let backend = super::microphone::MicrophoneBackend::new(config);
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "microphone"))]
                {
                    let _ = config;
                    anyhow::bail!("Microphone capture requires building with the `microphone` feature")
                }
            }

            AudioSource::File { path, realtime } => {
                let backend = super::file::FileBackend::new(path, config, realtime);
                Ok(Box::new(backend))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Default input device
    Microphone,
    /// WAV file replay; `realtime` paces blocks at capture speed
    File { path: PathBuf, realtime: bool },
}
