//! Orchestrates one or more Ampache server sessions: per-server handshake,
//! a single-at-a-time operation queue with session-expiry retry, and
//! shuffle-batch assembly, delivered back to a [`PlaybackController`].
//!
//! Grounded on `AmpacheServer`'s `networkFinished`/`startOperations` pair,
//! reworked from a `QNetworkAccessManager` callback chain into one
//! `tokio` task per server consuming an `mpsc` queue.

use crate::error::{CatalogError, Result};
use crate::operations::{build_query, primary_element, OpCode, OpData};
use crate::session::{handshake, Session};
use crate::shuffle::interleave;
use crate::xml::parse_reply;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use waveloom_ap::controller::{PlaybackController, ShuffleSource};
use waveloom_ap::pipeline::TrackInfo;

const OPERATION_COOLDOWN: std::time::Duration = std::time::Duration::from_millis(500);
const SESSION_RETRY_COOLDOWN: std::time::Duration = std::time::Duration::from_millis(50);

/// One configured Ampache endpoint: host, user, resolved password, and the
/// shuffle tags (if any) this server has been narrowed to.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub shuffle_tags: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct CatalogOptions {
    pub shuffle_count: usize,
    pub shuffle_favorite_frequency: usize,
    /// Size of the favorites/regulars pool fetched per query, reused and
    /// round-robined across many shuffle batches rather than re-queried at
    /// exactly the per-batch delivered count.
    pub random_lists_count: usize,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            shuffle_count: 5,
            shuffle_favorite_frequency: 4,
            random_lists_count: 11,
        }
    }
}

/// A fetched favorites/regulars pool and the rotation state `interleave`
/// advances across calls, persisted per server so small per-batch requests
/// don't force a fresh HTTP round-trip every time.
#[derive(Default)]
struct ShufflePool {
    favorites: Vec<HashMap<String, String>>,
    favorite_index: usize,
    regulars: Vec<HashMap<String, String>>,
    regular_index: usize,
}

enum Command {
    ShuffleBatch { count: usize },
}

struct ServerHandle {
    config: ServerConfig,
    tx: mpsc::UnboundedSender<Command>,
}

/// Fire-and-forget entry point consumed by [`PlaybackController`]; each
/// configured server runs its own task, so requests to different servers
/// never block one another.
pub struct CatalogClient {
    servers: Vec<ServerHandle>,
}

impl CatalogClient {
    pub fn new(http: reqwest::Client, options: CatalogOptions, servers: Vec<ServerConfig>, controller: Arc<PlaybackController>) -> Arc<Self> {
        let mut handles = Vec::with_capacity(servers.len());

        for (index, config) in servers.into_iter().enumerate() {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_server_task(index, http.clone(), config.clone(), options, rx, controller.clone()));
            handles.push(ServerHandle { config, tx });
        }

        Arc::new(Self { servers: handles })
    }
}

impl ShuffleSource for CatalogClient {
    fn server_count(&self) -> usize {
        self.servers.len()
    }

    fn server_has_shuffle_tags(&self, server_index: usize) -> bool {
        self.servers.get(server_index).is_some_and(|s| !s.config.shuffle_tags.is_empty())
    }

    fn request_shuffle_batch(&self, server_index: usize, count: usize) {
        let Some(server) = self.servers.get(server_index) else {
            warn!(server_index, "shuffle batch requested for unknown server");
            return;
        };
        if server.tx.send(Command::ShuffleBatch { count }).is_err() {
            warn!(server_index, "catalog server task is gone; dropping shuffle request");
        }
    }
}

async fn run_server_task(
    index: usize,
    http: reqwest::Client,
    config: ServerConfig,
    options: CatalogOptions,
    mut rx: mpsc::UnboundedReceiver<Command>,
    controller: Arc<PlaybackController>,
) {
    let session: Mutex<Option<Session>> = Mutex::new(None);
    let shuffled: Mutex<u64> = Mutex::new(0);
    let pool: Mutex<ShufflePool> = Mutex::new(ShufflePool::default());

    while let Some(command) = rx.recv().await {
        match command {
            Command::ShuffleBatch { count } => {
                match run_shuffle_batch(&http, &config, options, &session, &shuffled, &pool, count).await {
                    Ok(tracks) => {
                        info!(server = index, count = tracks.len(), "shuffle batch ready");
                        if let Err(e) = controller.receive_shuffle_batch(tracks) {
                            warn!(server = index, error = %e, "controller rejected shuffle batch");
                        }
                    }
                    Err(e) => warn!(server = index, error = %e, "shuffle batch failed"),
                }
            }
        }
        tokio::time::sleep(OPERATION_COOLDOWN).await;
    }
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Ensures a valid session exists, handshaking if needed.
async fn ensure_session(http: &reqwest::Client, config: &ServerConfig, session: &Mutex<Option<Session>>) -> Result<Session> {
    if let Some(s) = session.lock().clone() {
        return Ok(s);
    }
    let fresh = handshake(http, &config.host, &config.user, &config.password, now_unix()).await?;
    *session.lock() = Some(fresh.clone());
    Ok(fresh)
}

/// Runs one operation, transparently re-handshaking and retrying once if the
/// server reports the session expired.
async fn run_operation(
    http: &reqwest::Client,
    config: &ServerConfig,
    session: &Mutex<Option<Session>>,
    opcode: OpCode,
    data: &OpData,
) -> Result<Vec<HashMap<String, String>>> {
    let active = ensure_session(http, config, session).await?;
    let url = format!("{}/server/xml.server.php", config.host.trim_end_matches('/'));
    let query = build_query(opcode, data, active.api_version, &active.auth);

    let bytes = http.get(&url).query(&query).send().await?.bytes().await?;
    let reply = parse_reply(&bytes, primary_element(opcode, active.api_version), false)?;

    if let Some(message) = reply.error_message {
        if message.eq_ignore_ascii_case("session expired") {
            debug!("session expired, re-handshaking and retrying operation");
            *session.lock() = None;
            tokio::time::sleep(SESSION_RETRY_COOLDOWN).await;
            let fresh = ensure_session(http, config, session).await?;
            let query = build_query(opcode, data, fresh.api_version, &fresh.auth);
            let bytes = http.get(&url).query(&query).send().await?.bytes().await?;
            let reply = parse_reply(&bytes, primary_element(opcode, fresh.api_version), false)?;
            if let Some(message) = reply.error_message {
                return Err(CatalogError::ServerError {
                    code: reply.error_code.unwrap_or(0),
                    message,
                });
            }
            return Ok(reply.results);
        }
        return Err(CatalogError::ServerError {
            code: reply.error_code.unwrap_or(0),
            message,
        });
    }

    Ok(reply.results)
}

fn split_counts(shuffled_start: u64, limit: usize, favorite_frequency: usize) -> (usize, usize) {
    let freq = favorite_frequency.max(1) as u64;
    let mut favorite = 0usize;
    let mut regular = 0usize;
    for i in 0..limit as u64 {
        let position = shuffled_start + i + 1;
        if position % freq == 0 {
            favorite += 1;
        } else {
            regular += 1;
        }
    }
    (favorite, regular)
}

async fn run_shuffle_batch(
    http: &reqwest::Client,
    config: &ServerConfig,
    options: CatalogOptions,
    session: &Mutex<Option<Session>>,
    shuffled: &Mutex<u64>,
    pool: &Mutex<ShufflePool>,
    requested_count: usize,
) -> Result<Vec<TrackInfo>> {
    let limit = if requested_count > 0 { requested_count } else { options.shuffle_count };
    let (favorite_limit, regular_limit) = split_counts(*shuffled.lock(), limit, options.shuffle_favorite_frequency);

    if favorite_limit > 0 && pool.lock().favorites.is_empty() {
        let mut data = OpData::new();
        data.insert("favorite".into(), "1".into());
        data.insert("limit".into(), options.random_lists_count.to_string());
        let favorites = run_operation(http, config, session, OpCode::Shuffle, &data).await?;
        let mut pool = pool.lock();
        pool.favorites = favorites;
        pool.favorite_index = 0;
    }

    if regular_limit > 0 && pool.lock().regulars.is_empty() {
        let mut data = OpData::new();
        if !config.shuffle_tags.is_empty() {
            data.insert("tags".into(), config.shuffle_tags.join(","));
        }
        data.insert("limit".into(), options.random_lists_count.to_string());
        let regulars = run_operation(http, config, session, OpCode::Shuffle, &data).await?;
        let mut pool = pool.lock();
        pool.regulars = regulars;
        pool.regular_index = 0;
    }

    let mut shuffled_guard = shuffled.lock();
    let mut pool_guard = pool.lock();
    let ShufflePool {
        favorites,
        favorite_index,
        regulars,
        regular_index,
    } = &mut *pool_guard;
    let records = interleave(
        favorites,
        regulars,
        limit,
        options.shuffle_favorite_frequency,
        &mut shuffled_guard,
        favorite_index,
        regular_index,
    );
    drop(pool_guard);
    drop(shuffled_guard);

    Ok(records.into_iter().map(|r| record_to_track_info(&config.host, r)).collect())
}

fn record_to_track_info(host: &str, record: HashMap<String, String>) -> TrackInfo {
    let source_id = record.get("id").cloned().unwrap_or_default();
    TrackInfo {
        id: format!("{host}#{source_id}"),
        url: record.get("url").cloned().unwrap_or_default(),
        title: record.get("title").cloned().unwrap_or_default(),
        artist: record.get("artist").cloned().unwrap_or_default(),
        album: record.get("album").cloned().unwrap_or_default(),
        album_id: None,
        track_number: record.get("track").and_then(|t| t.parse().ok()),
        tags: record
            .get("tags")
            .map(|t| t.split('|').map(str::to_string).collect())
            .unwrap_or_default(),
        length_milliseconds: record.get("time").and_then(|t| t.parse::<i64>().ok()).map(|secs| secs * 1000),
        fade_duration_seconds: None,
        radio_station: false,
        favorite: record.get("flag").is_some_and(|f| f == "1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_counts_matches_interleave_positions() {
        let (favorite, regular) = split_counts(0, 8, 4);
        assert_eq!(favorite, 2);
        assert_eq!(regular, 6);
    }

    #[test]
    fn split_counts_continues_from_running_counter() {
        let (favorite, regular) = split_counts(3, 1, 4);
        assert_eq!(favorite, 1);
        assert_eq!(regular, 0);
    }

    #[test]
    fn record_to_track_info_maps_fields() {
        let mut record = HashMap::new();
        record.insert("id".to_string(), "42".to_string());
        record.insert("title".to_string(), "A Song".to_string());
        record.insert("tags".to_string(), "rock|live".to_string());
        record.insert("time".to_string(), "185".to_string());

        let track = record_to_track_info("https://ampache.example", record);
        assert_eq!(track.id, "https://ampache.example#42");
        assert_eq!(track.title, "A Song");
        assert_eq!(track.tags, vec!["rock".to_string(), "live".to_string()]);
        assert_eq!(track.length_milliseconds, Some(185_000));
    }
}
