use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use multitrack_recorder::{
    AudioRecorder, Config, FileStateStore, NatsController, NatsVoiceTransport, RecorderService,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "multitrack-recorder", version, about = "Multi-track voice channel recorder")]
struct Cli {
    /// Configuration file, without extension
    #[arg(short, long, default_value = "config/recorder")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for start/stop commands over NATS (default)
    Serve,
    /// Record one channel until Ctrl+C or for a fixed duration
    Record {
        /// Voice channel ID
        #[arg(short = 'C', long)]
        channel: String,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Recordings directory: {}", cfg.recorder.recordings_path.display());

    let transport = NatsVoiceTransport::connect(
        &cfg.nats.url,
        &cfg.nats.gateway_prefix,
        cfg.recorder.packet_channel_capacity,
    )
    .await?;
    let recorder = AudioRecorder::new(cfg.recorder.clone(), Arc::new(transport));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg, recorder).await,
        Command::Record { channel, duration } => record(recorder, &channel, duration).await,
    }
}

async fn serve(cfg: Config, recorder: AudioRecorder) -> Result<()> {
    let controller = NatsController::connect(&cfg.nats.url, &cfg.nats.control_prefix).await?;
    let store = Arc::new(FileStateStore::new(&cfg.state.path));

    let (tx, rx) = mpsc::channel(16);
    let listener = controller.listen(tx).await?;

    let mut service = RecorderService::new(recorder, store, Arc::new(controller));
    service.boot().await?;

    info!("Up and ready");

    service
        .run(rx, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    listener.abort();
    Ok(())
}

async fn record(mut recorder: AudioRecorder, channel_id: &str, duration: Option<u64>) -> Result<()> {
    let channel = recorder.transport().resolve_channel(channel_id).await?;
    let record_id = recorder.start_recording(&channel).await?;

    info!("Recording {} as {}, press Ctrl+C to stop", channel.name, record_id);

    match duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
        }
    }

    recorder.stop_recording().await?;

    let paths = recorder.session_paths(&record_id);
    info!("Recording saved to {}", paths.data.display());

    Ok(())
}
