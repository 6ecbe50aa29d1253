//! Shared application state threaded through the HTTP control plane.

use crate::config::ServerConfig;
use crate::controller::PlaybackController;
use parking_lot::Mutex;
use std::sync::Arc;
use waveloom_common::events::EventBus;

/// Everything an API handler needs: the controller to act on, the bus to
/// subscribe to for `/events`, and the configured-server list. Cheap to
/// clone (all fields are `Arc`s), as axum expects of its `State`.
#[derive(Clone)]
pub struct SharedState {
    pub controller: Arc<PlaybackController>,
    pub event_bus: Arc<EventBus>,
    pub servers: Arc<Mutex<Vec<ServerConfig>>>,
}

impl SharedState {
    pub fn new(
        controller: Arc<PlaybackController>,
        event_bus: Arc<EventBus>,
        servers: Vec<ServerConfig>,
    ) -> Self {
        Self {
            controller,
            event_bus,
            servers: Arc::new(Mutex::new(servers)),
        }
    }
}
