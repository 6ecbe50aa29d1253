//! Configured-server (Ampache) management. Runtime additions/removals here
//! affect only the in-memory list the control plane reports; wiring a newly
//! added server into an active [`ShuffleSource`](crate::controller::ShuffleSource)
//! is the catalog client's job, not this handler's.

use crate::config::ServerConfig;
use crate::state::SharedState;
use axum::extract::{Path, State};
use axum::{http::StatusCode, Json};

pub async fn list_servers(State(state): State<SharedState>) -> Json<Vec<ServerConfig>> {
    Json(state.servers.lock().clone())
}

pub async fn add_server(
    State(state): State<SharedState>,
    Json(server): Json<ServerConfig>,
) -> StatusCode {
    state.servers.lock().push(server);
    StatusCode::CREATED
}

pub async fn remove_server(
    State(state): State<SharedState>,
    Path(host): Path<String>,
) -> StatusCode {
    let mut servers = state.servers.lock();
    let before = servers.len();
    servers.retain(|s| s.host != host);
    if servers.len() != before {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
