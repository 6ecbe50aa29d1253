//! Low-level audio primitives: the desired PCM format, the biquad filter
//! chain, the replay-gain calculator, the decoder facade, and the output
//! device adapter. Everything above this module (cache, analyzer, equalizer,
//! pipeline, controller) is built out of these pieces.

pub mod decoder;
pub mod format;
pub mod iir;
pub mod output;
pub mod replaygain;
pub mod resampler;

pub use format::{AudioFormat, PcmChunk, SampleType};
