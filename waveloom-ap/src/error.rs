//! Error types for the audio playback engine.
//!
//! Each leaf error type maps to the recovery policy from the error-handling
//! design: transient network/decode errors are retried or treated as a
//! graceful end of track; device, cache, and config errors are surfaced and,
//! in most cases, fatal to the owning pipeline.

use thiserror::Error;
use waveloom_common::PlaybackState;

/// Main error type for the audio playback engine.
#[derive(Debug, Error)]
pub enum AudioPlayerError {
    /// IO errors from file or device operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Pipeline/controller orchestration errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Decoding-specific errors
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// PCM cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Audio output device errors
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Errors related to pipeline/controller orchestration
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid state transition
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: PlaybackState,
        to: PlaybackState,
    },

    /// Queue is empty
    #[error("Playback queue is empty")]
    QueueEmpty,

    /// Position out of bounds
    #[error("Seek position {position_ms}ms out of bounds (0..{duration_ms}ms)")]
    PositionOutOfBounds { position_ms: i64, duration_ms: i64 },

    /// Crossfade configuration error
    #[error("Invalid crossfade configuration: {reason}")]
    InvalidCrossfade { reason: String },
}

/// Errors related to audio decoding
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unsupported audio format
    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    /// Source not found (local file or remote URL)
    #[error("Audio source not found: {url}")]
    SourceNotFound { url: String },

    /// Corrupted audio data
    #[error("Corrupted audio data at offset {offset}")]
    CorruptedData { offset: u64 },

    /// Failed to probe audio format
    #[error("Failed to probe audio format")]
    ProbeFailure,

    /// No audio tracks in source
    #[error("No audio tracks found in source")]
    NoAudioTracks,

    /// Network error while streaming a remote source
    #[error("Network error while streaming: {reason}")]
    NetworkError { reason: String },
}

/// Errors related to the PCM cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// Could not create the scratch file backend
    #[error("Could not create temporary file: {reason}")]
    TempFileCreateFailed { reason: String },

    /// Neither memory nor file backend is usable
    #[error("Neither file nor memory backend is available for PCM caching")]
    BothBackendsFailed,

    /// Out of memory
    #[error("Out of memory: tried to reserve {requested_mb:.1} MB, {available_mb:.1} MB available")]
    OutOfMemory { requested_mb: f64, available_mb: f64 },
}

/// Errors related to the OS audio output device
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No audio device available
    #[error("No audio output device available")]
    NoDevice,

    /// Audio device disconnected during playback
    #[error("Audio device disconnected")]
    DeviceDisconnected,

    /// Failed to open the device with the desired format
    #[error("Failed to open audio device: {reason}")]
    OpenFailed { reason: String },

    /// Write to the device failed
    #[error("Failed to write to audio device: {reason}")]
    WriteFailed { reason: String },
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, AudioPlayerError>;

impl AudioPlayerError {
    /// Get the recommended recovery strategy for this error
    pub fn recovery_strategy(&self) -> waveloom_common::RecoveryStrategy {
        use waveloom_common::RecoveryStrategy::*;
        match self {
            AudioPlayerError::Io(_) => Retry,
            AudioPlayerError::Decode(DecodeError::NetworkError { .. }) => Retry,
            AudioPlayerError::Decode(
                DecodeError::SourceNotFound { .. }
                | DecodeError::UnsupportedFormat { .. }
                | DecodeError::CorruptedData { .. }
                | DecodeError::NoAudioTracks
                | DecodeError::ProbeFailure,
            ) => Fallback,
            AudioPlayerError::Device(_) => SurfaceToUser,
            AudioPlayerError::Cache(_) => Fatal,
            AudioPlayerError::Config(_) => Fatal,
            AudioPlayerError::Pipeline(_) => SurfaceToUser,
            AudioPlayerError::Other(_) => SurfaceToUser,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            AudioPlayerError::Decode(DecodeError::UnsupportedFormat { format }) => {
                format!("The audio format '{format}' is not supported")
            }
            AudioPlayerError::Decode(DecodeError::SourceNotFound { url }) => {
                format!("Could not open audio source: {url}")
            }
            AudioPlayerError::Device(DeviceError::NoDevice) => {
                "No audio output device available".to_string()
            }
            AudioPlayerError::Device(DeviceError::DeviceDisconnected) => {
                "Audio device was disconnected".to_string()
            }
            AudioPlayerError::Cache(CacheError::OutOfMemory { .. }) => {
                "Not enough memory to buffer audio".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Get an error code for logging/debugging
    pub fn error_code(&self) -> &'static str {
        match self {
            AudioPlayerError::Io(_) => "AP_IO_001",
            AudioPlayerError::Pipeline(e) => match e {
                PipelineError::InvalidStateTransition { .. } => "AP_PL_001",
                PipelineError::QueueEmpty => "AP_PL_002",
                PipelineError::PositionOutOfBounds { .. } => "AP_PL_003",
                PipelineError::InvalidCrossfade { .. } => "AP_PL_004",
            },
            AudioPlayerError::Decode(e) => match e {
                DecodeError::UnsupportedFormat { .. } => "AP_DC_001",
                DecodeError::SourceNotFound { .. } => "AP_DC_002",
                DecodeError::CorruptedData { .. } => "AP_DC_003",
                DecodeError::ProbeFailure => "AP_DC_004",
                DecodeError::NoAudioTracks => "AP_DC_005",
                DecodeError::NetworkError { .. } => "AP_DC_006",
            },
            AudioPlayerError::Cache(e) => match e {
                CacheError::TempFileCreateFailed { .. } => "AP_CA_001",
                CacheError::BothBackendsFailed => "AP_CA_002",
                CacheError::OutOfMemory { .. } => "AP_CA_003",
            },
            AudioPlayerError::Device(e) => match e {
                DeviceError::NoDevice => "AP_DV_001",
                DeviceError::DeviceDisconnected => "AP_DV_002",
                DeviceError::OpenFailed { .. } => "AP_DV_003",
                DeviceError::WriteFailed { .. } => "AP_DV_004",
            },
            AudioPlayerError::Config(_) => "AP_CF_001",
            AudioPlayerError::Other(_) => "AP_OT_001",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_error_codes_unique() {
        let errors = vec![
            AudioPlayerError::Pipeline(PipelineError::QueueEmpty),
            AudioPlayerError::Decode(DecodeError::ProbeFailure),
            AudioPlayerError::Cache(CacheError::BothBackendsFailed),
            AudioPlayerError::Device(DeviceError::NoDevice),
            AudioPlayerError::Config("bad".into()),
        ];

        let codes: HashSet<_> = errors.iter().map(|e| e.error_code()).collect();
        assert_eq!(codes.len(), errors.len(), "Error codes must be unique");
    }

    #[test]
    fn test_recovery_strategies() {
        let source_not_found = AudioPlayerError::Decode(DecodeError::SourceNotFound {
            url: "file:///test.mp3".to_string(),
        });
        assert_eq!(
            source_not_found.recovery_strategy(),
            waveloom_common::RecoveryStrategy::Fallback
        );

        let out_of_memory = AudioPlayerError::Cache(CacheError::OutOfMemory {
            requested_mb: 10.0,
            available_mb: 1.0,
        });
        assert_eq!(out_of_memory.recovery_strategy(), waveloom_common::RecoveryStrategy::Fatal);
    }
}
