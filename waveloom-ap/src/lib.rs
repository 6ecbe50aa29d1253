//! Audio playback engine: decode, cache, analyze, equalize, and output a
//! single audio stream with sample-accurate crossfading, driven by a
//! playlist/shuffle/crossfade controller and exposed over an HTTP control
//! plane.

pub mod analyzer;
pub mod api;
pub mod audio;
pub mod config;
pub mod controller;
pub mod equalizer;
pub mod error;
pub mod pcm_cache;
pub mod pipeline;
pub mod state;

pub use error::{AudioPlayerError, Result};
pub use state::SharedState;
