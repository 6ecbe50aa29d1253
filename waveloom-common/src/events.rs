//! Broadcast event bus and the event vocabulary published to SSE subscribers.
//!
//! Mirrors the signal/slot wiring of the original design (§9 of the design
//! notes): a producer emits a typed event, independent consumers (the SSE
//! broadcaster, internal watchers) subscribe without the producer knowing
//! who, if anyone, is listening.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Playback transport state as observed from outside a pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Decoding,
    Playing,
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Decoding => "decoding",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

/// Events published on the shared bus and republished verbatim over SSE.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// A track pipeline changed state.
    StateChanged {
        track_id: String,
        state: PlaybackState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback position advanced (emitted roughly every 150ms per pipeline).
    PositionChanged {
        track_id: String,
        position_ms: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A fade-out began; crossfade orchestration may start the next track.
    FadeoutStarted {
        track_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A pipeline finished playing and was torn down.
    Finished {
        track_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Smoothed replay-gain value changed.
    ReplayGainChanged {
        track_id: String,
        current_db: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A new peak-meter sample is available.
    PeakLevels {
        track_id: String,
        left: f64,
        right: f64,
        delay_us: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The playlist contents changed (enqueue, dequeue, shuffle batch).
    QueueChanged {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A non-fatal or fatal error occurred; `fatal` distinguishes the two.
    PlayerError {
        track_id: Option<String>,
        code: String,
        message: String,
        fatal: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::StateChanged { .. } => "StateChanged",
            PlayerEvent::PositionChanged { .. } => "PositionChanged",
            PlayerEvent::FadeoutStarted { .. } => "FadeoutStarted",
            PlayerEvent::Finished { .. } => "Finished",
            PlayerEvent::ReplayGainChanged { .. } => "ReplayGainChanged",
            PlayerEvent::PeakLevels { .. } => "PeakLevels",
            PlayerEvent::QueueChanged { .. } => "QueueChanged",
            PlayerEvent::PlayerError { .. } => "PlayerError",
        }
    }
}

/// A thin wrapper around [`tokio::sync::broadcast`] sized for the player's
/// event volume (position/peak events dominate; a slow subscriber drops
/// old events rather than stalling the publisher).
pub struct EventBus {
    sender: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.sender.subscribe()
    }

    /// Emit an event; error indicates no subscribers were listening.
    pub fn emit(&self, event: PlayerEvent) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.sender.send(event)
    }

    /// Emit an event, ignoring the "no subscribers" case.
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.sender.send(event);
    }
}

/// Generates a fresh correlation id for events that need one outside a
/// track/session context (e.g. one-off command acknowledgements).
pub fn new_correlation_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bus_has_no_subscribers() {
        let bus = EventBus::new(64);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn subscribing_increments_count() {
        let bus = EventBus::new(64);
        let _a = bus.subscribe();
        let _b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn emit_without_subscribers_errors() {
        let bus = EventBus::new(64);
        let event = PlayerEvent::QueueChanged {
            timestamp: chrono::Utc::now(),
        };
        assert!(bus.emit(event).is_err());
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();

        bus.emit_lossy(PlayerEvent::StateChanged {
            track_id: "t1".into(),
            state: PlaybackState::Playing,
            timestamp: chrono::Utc::now(),
        });

        let received = rx.recv().await.unwrap();
        match received {
            PlayerEvent::StateChanged { track_id, state, .. } => {
                assert_eq!(track_id, "t1");
                assert_eq!(state, PlaybackState::Playing);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
