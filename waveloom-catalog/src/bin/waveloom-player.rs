//! Full player binary: wires the playback engine (`waveloom-ap`) to the
//! Ampache catalog client (`waveloom-catalog`) so shuffle requests are
//! actually served, then exposes the combined control plane over HTTP.
//!
//! `waveloom-ap`'s own binary stays catalog-free (local playback only) so
//! the engine crate never depends on the catalog crate; this binary is the
//! one place both come together.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waveloom_ap::audio::AudioFormat;
use waveloom_ap::config::{CliOverrides, Config};
use waveloom_ap::controller::PlaybackController;
use waveloom_ap::{api, SharedState};
use waveloom_catalog::client::{CatalogClient, CatalogOptions, ServerConfig as CatalogServerConfig};
use waveloom_common::events::EventBus;

const EVENT_BUS_CAPACITY: usize = 1024;
const SHUFFLE_COUNTDOWN_TICK: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "waveloom-player")]
#[command(about = "Audio playback engine with Ampache catalog integration")]
#[command(version)]
struct Args {
    #[arg(short, long, default_value = "waveloom.toml")]
    config: PathBuf,

    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waveloom_ap=info,waveloom_catalog=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config, CliOverrides { port: args.port })?;
    info!(port = config.port, servers = config.servers.len(), "configuration loaded");

    let event_bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
    let controller = PlaybackController::new(AudioFormat::CD_QUALITY, event_bus.clone(), config.playback.clone());

    let catalog_servers: Vec<CatalogServerConfig> = config
        .servers
        .iter()
        .filter_map(|s| resolve_server(s))
        .collect();

    if !catalog_servers.is_empty() {
        let http = reqwest::Client::new();
        let catalog_options = CatalogOptions {
            shuffle_count: config.playback.shuffle_count,
            shuffle_favorite_frequency: config.playback.shuffle_favorite_frequency,
            random_lists_count: config.random_lists_count,
        };
        let catalog = CatalogClient::new(http, catalog_options, catalog_servers, controller.clone());
        controller.set_shuffle_source(catalog);
    }

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

    Ok(())
}

/// Resolves a configured server's password from its declared environment
/// variable; servers without one configured, or whose variable is unset,
/// are skipped with a warning rather than failing startup.
fn resolve_server(server: &waveloom_ap::config::ServerConfig) -> Option<CatalogServerConfig> {
    let password_env = server.password_env.as_deref()?;
    match std::env::var(password_env) {
        Ok(password) => Some(CatalogServerConfig {
            host: server.host.clone(),
            user: server.user.clone(),
            password,
            shuffle_tags: server.shuffle_tags.clone(),
        }),
        Err(_) => {
            warn!(host = %server.host, env = %password_env, "password environment variable not set; skipping server");
            None
        }
    }
}
