use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_assistant::audio::{AudioBackendConfig, AudioBackendFactory, AudioSource};
use voice_assistant::bus::{BusClient, BusOptions, BusTransport, MemoryBroker, NatsTransport};
use voice_assistant::config::TransportKind;
use voice_assistant::{load_engine, ActionDispatcher, AssistantSession, Config, RuleMatcher, SessionInput};

#[derive(Parser)]
#[command(name = "voice-assistant", version, about = "Voice-triggered command dispatcher")]
struct Cli {
    /// Configuration file, extension optional
    #[arg(long, global = true, default_value = "config/assistant")]
    config: String,

    /// Override the configured bus transport
    #[arg(long, global = true, value_enum)]
    bus: Option<TransportKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen on the default microphone until Ctrl-C
    Listen,

    /// Decode a 16-bit WAV file as if it were captured live
    Replay {
        wav: PathBuf,

        /// Pace blocks at capture speed instead of as fast as the recognizer allows
        #[arg(long)]
        realtime: bool,
    },

    /// Treat each stdin line as a recognized utterance
    Type,

    /// Print every message below the base topic as a JSON line
    Monitor {
        #[arg(default_value = "#")]
        topic: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::load(&cli.config)?;
    if let Some(transport) = cli.bus {
        cfg.bus.transport = transport;
    }

    let default_level = if cfg.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    info!("Voice assistant v{}", env!("CARGO_PKG_VERSION"));

    let transport = build_transport(&cfg)?;
    let bus = Arc::new(BusClient::new(transport, BusOptions::from(&cfg.bus)));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build scheduler runtime")?;

    runtime.block_on(run(cli.command, cfg, bus))
}

fn build_transport(cfg: &Config) -> Result<Arc<dyn BusTransport>> {
    match cfg.bus.transport {
        TransportKind::Nats => {
            info!("Bus: NATS at {}", cfg.bus.url());
            Ok(Arc::new(NatsTransport::new(&cfg.bus)?))
        }
        TransportKind::Memory => {
            info!("Bus: in-process memory broker");
            Ok(Arc::new(MemoryBroker::new().transport()))
        }
    }
}

async fn run(command: Command, cfg: Config, bus: Arc<BusClient>) -> Result<()> {
    let input = match command {
        Command::Monitor { topic } => return monitor(&bus, &topic).await,
        Command::Type => SessionInput::Text(Box::new(std::io::BufReader::new(std::io::stdin()))),
        Command::Listen => audio_input(&cfg, AudioSource::Microphone)?,
        Command::Replay { wav, realtime } => audio_input(&cfg, AudioSource::File { path: wav, realtime })?,
    };

    let matcher = RuleMatcher::builtin().context("Failed to compile intent rules")?;
    let dispatcher = ActionDispatcher::with_builtin_actions(Arc::clone(&bus), Box::new(matcher));
    let mut session = AssistantSession::new(dispatcher);

    session.start(input).await?;

    tokio::select! {
        _ = session.wait() => info!("Input finished"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    let stats = session.stop().await?;
    info!(
        "Session stats: {}",
        serde_json::to_string(&stats).context("Failed to serialize session stats")?
    );

    Ok(())
}

fn audio_input(cfg: &Config, source: AudioSource) -> Result<SessionInput> {
    let engine = load_engine(&cfg.recognizer, cfg.audio.sample_rate).context("Failed to load speech engine")?;
    let backend = AudioBackendFactory::create(source, AudioBackendConfig::from(&cfg.audio))?;

    Ok(SessionInput::Audio {
        engine,
        backend,
        queue_capacity: cfg.audio.queue_capacity,
    })
}

async fn monitor(bus: &BusClient, topic: &str) -> Result<()> {
    info!("Monitoring {}", bus.topic(topic));

    let subscription = bus.subscribe_loop(topic, |message| {
        let line = serde_json::json!({
            "topic": message.topic,
            "payload": message.payload_text(),
            "received_at": message.received_at,
        });
        println!("{}", line);
        Ok(())
    });

    tokio::select! {
        result = subscription => {
            result.context("Subscription failed")?;
            warn!("Connection lost, monitor exiting");
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    bus.disconnect().await;
    Ok(())
}
