use anyhow::{ensure, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::bus::QualityOfService;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bus: BusConfig,
    pub audio: AudioConfig,
    pub recognizer: RecognizerConfig,
    /// Verbose logging when `RUST_LOG` is not set
    #[serde(default)]
    pub debug: bool,
}

/// Which broker connection backs the bus client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Nats,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub transport: TransportKind,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub base_topic: String,
    pub default_qos: QualityOfService,
    pub connect_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    pub disconnect_grace_ms: u64,
    pub subscribe_poll_ms: u64,
}

impl BusConfig {
    pub fn url(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }

    /// Username and password, only when both are set
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Capture block length in milliseconds
    pub block_ms: u64,
    /// Frame queue bound, in blocks
    pub queue_capacity: usize,
}

impl AudioConfig {
    /// Samples per captured block
    pub fn block_samples(&self) -> usize {
        (self.sample_rate as u64 * self.block_ms / 1000) as usize
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognizerConfig {
    pub model_path: String,
}

impl RecognizerConfig {
    /// Model directory with `~` expanded
    pub fn model_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.model_path).into_owned())
    }
}

impl Config {
    /// Load configuration from `path` (optional, any supported format)
    /// layered over defaults and under `ASSISTANT__SECTION__KEY` variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("bus.transport", "nats")?
            .set_default("bus.host", "localhost")?
            .set_default("bus.port", 4222_i64)?
            .set_default("bus.base_topic", "assistant")?
            .set_default("bus.default_qos", "at_least_once")?
            .set_default("bus.connect_timeout_ms", 5000_i64)?
            .set_default("bus.publish_timeout_ms", 5000_i64)?
            .set_default("bus.disconnect_grace_ms", 250_i64)?
            .set_default("bus.subscribe_poll_ms", 1000_i64)?
            .set_default("audio.sample_rate", 16000_i64)?
            .set_default("audio.block_ms", 60_i64)?
            .set_default("audio.queue_capacity", 64_i64)?
            .set_default("recognizer.model_path", "models/vosk-model-small-es-0.42")?
            .set_default("debug", false)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("ASSISTANT").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.audio.sample_rate > 0, "audio.sample_rate must be positive");
        ensure!(
            self.audio.block_samples() > 0,
            "audio.block_ms of {} ms yields an empty block at {} Hz",
            self.audio.block_ms,
            self.audio.sample_rate
        );
        ensure!(self.audio.queue_capacity > 0, "audio.queue_capacity must be positive");
        ensure!(!self.bus.base_topic.trim().is_empty(), "bus.base_topic must not be empty");
        ensure!(self.bus.connect_timeout_ms > 0, "bus.connect_timeout_ms must be positive");
        ensure!(self.bus.publish_timeout_ms > 0, "bus.publish_timeout_ms must be positive");
        ensure!(self.bus.subscribe_poll_ms > 0, "bus.subscribe_poll_ms must be positive");
        Ok(())
    }
}
