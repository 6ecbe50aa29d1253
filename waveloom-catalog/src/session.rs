//! Handshake with an Ampache server: computes the time-based auth hash,
//! issues the handshake request, and validates the reported API version.

use crate::error::{CatalogError, Result};
use crate::xml::parse_reply;
use sha2::{Digest, Sha256};

const MIN_API_VERSION: i64 = 5_000_000;

#[derive(Debug, Clone)]
pub struct Session {
    pub auth: String,
    pub api_version: i64,
    pub song_count: i64,
}

/// Normalizes a reported API version string: a bare `"5XXXXX"` means
/// `5XXXXX0`, a dotted `"a.b.c"` means `a*1_000_000 + b*1_000 + c`.
pub fn normalize_api_version(raw: &str) -> i64 {
    if let Ok(n) = raw.parse::<i64>() {
        if (500_000..1_000_000).contains(&n) {
            return n * 10;
        }
        return n;
    }

    let parts: Vec<&str> = raw.split('.').collect();
    if parts.len() == 3 {
        if let (Ok(major), Ok(minor), Ok(patch)) = (
            parts[0].parse::<i64>(),
            parts[1].parse::<i64>(),
            parts[2].parse::<i64>(),
        ) {
            return major * 1_000_000 + minor * 1_000 + patch;
        }
    }

    0
}

fn auth_hash(password: &str, timestamp: i64) -> String {
    let password_hash = Sha256::digest(password.as_bytes());
    let password_hash_hex = hex::encode(password_hash);
    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(password_hash_hex.as_bytes());
    hex::encode(hasher.finalize())
}

pub async fn handshake(
    http: &reqwest::Client,
    host: &str,
    user: &str,
    password: &str,
    timestamp: i64,
) -> Result<Session> {
    let auth = auth_hash(password, timestamp);
    let url = format!("{}/server/xml.server.php", host.trim_end_matches('/'));

    let response = http
        .get(&url)
        .query(&[
            ("action", "handshake"),
            ("auth", auth.as_str()),
            ("timestamp", timestamp.to_string().as_str()),
            ("version", MIN_API_VERSION.to_string().as_str()),
            ("user", user),
        ])
        .send()
        .await?
        .bytes()
        .await?;

    let reply = parse_reply(&response, "", true)?;

    if let Some(message) = reply.error_message {
        return Err(CatalogError::ServerError {
            code: reply.error_code.unwrap_or(0),
            message,
        });
    }

    let api_version = normalize_api_version(reply.api_raw.as_deref().unwrap_or(""));
    if api_version < MIN_API_VERSION {
        return Err(CatalogError::ApiTooOld { version: api_version });
    }

    let auth = reply
        .auth
        .ok_or_else(|| CatalogError::InvalidReply("handshake reply missing <auth>".into()))?;

    Ok(Session {
        auth,
        api_version,
        song_count: reply.songs.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_six_digit_version() {
        assert_eq!(normalize_api_version("500000"), 5_000_000);
        assert_eq!(normalize_api_version("600000"), 6_000_000);
    }

    #[test]
    fn normalizes_dotted_version() {
        assert_eq!(normalize_api_version("6.0.1"), 6_000_001);
    }

    #[test]
    fn already_normalized_version_passes_through() {
        assert_eq!(normalize_api_version("6000001"), 6_000_001);
    }

    #[test]
    fn unparseable_version_is_zero() {
        assert_eq!(normalize_api_version("not-a-version"), 0);
    }

    #[test]
    fn auth_hash_is_deterministic() {
        let a = auth_hash("hunter2", 1_700_000_000);
        let b = auth_hash("hunter2", 1_700_000_000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
