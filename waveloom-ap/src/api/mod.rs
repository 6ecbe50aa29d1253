//! HTTP control plane: playlist inspection/mutation, transport commands,
//! equalizer gain get/set, configured-server management, and the `/events`
//! Server-Sent Events stream.

pub mod equalizer;
pub mod playback;
pub mod servers;
pub mod sse;

use crate::state::SharedState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/playlist", get(playback::get_playlist).post(playback::enqueue))
        .route("/playlist/:track_id", delete(playback::remove_from_playlist))
        .route("/transport/play", post(playback::play))
        .route("/transport/pause", post(playback::pause))
        .route("/transport/resume", post(playback::resume))
        .route("/transport/skip", post(playback::skip))
        .route("/transport/previous", post(playback::previous))
        .route("/transport/stop", post(playback::stop))
        .route("/transport/seek", post(playback::seek))
        .route("/transport/state", get(playback::get_state))
        .route("/equalizer", get(equalizer::get_equalizer).post(equalizer::set_equalizer))
        .route("/servers", get(servers::list_servers).post(servers::add_server))
        .route("/servers/:server_id", delete(servers::remove_server))
        .route("/events", get(sse::event_stream))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(json!({
        "status": "ok",
        "module": "waveloom-ap",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}