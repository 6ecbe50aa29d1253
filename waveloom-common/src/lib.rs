//! Shared types used by both the playback engine and the catalog client:
//! the error taxonomy, the broadcast event bus and its event vocabulary,
//! and small Server-Sent Events helpers.

pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, RecoveryStrategy, Result};
pub use events::{EventBus, PlaybackState, PlayerEvent};
