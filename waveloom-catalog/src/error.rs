//! Error taxonomy for the Ampache-protocol catalog client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to parse XML reply: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("server responded with error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("session expired")]
    SessionExpired,

    #[error("server API version {version} is below the minimum of 5000000")]
    ApiTooOld { version: i64 },

    #[error("malformed reply: {0}")]
    InvalidReply(String),

    #[error("no password available for server (set {0} or configure a password)")]
    NoCredentials(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
