//! Common error types shared across the player crates.

use thiserror::Error;

/// Common result type.
pub type Result<T> = std::result::Result<T, Error>;

/// How a caller should respond to an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Retry the operation; the failure is expected to be transient.
    Retry,
    /// Fall back to a degraded mode and continue.
    Fallback,
    /// Surface the error to the user; no automatic recovery.
    SurfaceToUser,
    /// Unrecoverable; the owning component must be torn down.
    Fatal,
}

/// Errors shared across the player crates that are not specific to the
/// playback pipeline or the catalog protocol.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Io(_) => "common.io",
            Error::Config(_) => "common.config",
            Error::NotFound(_) => "common.not_found",
            Error::InvalidInput(_) => "common.invalid_input",
            Error::Internal(_) => "common.internal",
        }
    }

    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            Error::Io(_) => RecoveryStrategy::Retry,
            Error::Config(_) => RecoveryStrategy::Fatal,
            Error::NotFound(_) => RecoveryStrategy::SurfaceToUser,
            Error::InvalidInput(_) => RecoveryStrategy::SurfaceToUser,
            Error::Internal(_) => RecoveryStrategy::Fatal,
        }
    }

    /// A short message suitable for display in a GUI collaborator.
    pub fn user_message(&self) -> String {
        match self {
            Error::Io(e) => format!("A local file or device operation failed: {e}"),
            Error::Config(msg) => format!("Configuration problem: {msg}"),
            Error::NotFound(msg) => format!("Not found: {msg}"),
            Error::InvalidInput(msg) => format!("Invalid input: {msg}"),
            Error::Internal(msg) => format!("Internal error: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable_strings() {
        let errors: Vec<Error> = vec![
            Error::Config("x".into()),
            Error::NotFound("x".into()),
            Error::InvalidInput("x".into()),
            Error::Internal("x".into()),
        ];
        let codes: Vec<&str> = errors.iter().map(Error::error_code).collect();
        let mut unique = codes.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(codes.len(), unique.len(), "error codes must be unique");
    }

    #[test]
    fn fatal_errors_have_no_automatic_retry() {
        assert_eq!(
            Error::Config("bad".into()).recovery_strategy(),
            RecoveryStrategy::Fatal
        );
        assert_eq!(
            Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")).recovery_strategy(),
            RecoveryStrategy::Retry
        );
    }
}
