//! Audio playback engine: sample-accurate crossfading over a
//! decode/cache/analyze/equalize/output pipeline, driven by a playlist and
//! shuffle/crossfade policy, exposed over an HTTP control plane.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waveloom_ap::audio::AudioFormat;
use waveloom_ap::config::{CliOverrides, Config};
use waveloom_ap::controller::PlaybackController;
use waveloom_ap::{api, SharedState};
use waveloom_common::events::EventBus;

const EVENT_BUS_CAPACITY: usize = 1024;
const SHUFFLE_COUNTDOWN_TICK: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "waveloom-ap")]
#[command(about = "Audio playback engine with sample-accurate crossfading")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "waveloom.toml")]
    config: PathBuf,

    /// HTTP control-plane port (overrides config file and environment).
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waveloom_ap=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let args = Args::parse();
    info!(config_path = %args.config.display(), "starting waveloom-ap");

    let config = Config::load(&args.config, CliOverrides { port: args.port })?;
    info!(port = config.port, servers = config.servers.len(), "configuration loaded");

    let event_bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
    let controller = PlaybackController::new(AudioFormat::CD_QUALITY, event_bus.clone(), config.playback.clone());

    tokio::spawn({
        let controller = controller.clone();
        async move {
            let mut ticker = tokio::time::interval(SHUFFLE_COUNTDOWN_TICK);
            loop {
                ticker.tick().await;
                controller.tick_shuffle_countdown();
            }
        }
    });

    let shared_state = SharedState::new(controller, event_bus, config.servers.clone());
    let router = api::create_router(shared_state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "control plane listening");
    axum::serve(listener, router).await?;

    info!("waveloom-ap shutting down");
    Ok(())
}
