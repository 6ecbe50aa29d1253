//! Playlist inspection/mutation and transport command handlers.

use crate::pipeline::TrackInfo;
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Wire shape for a track handed to `/playlist` or `/transport/play`;
/// converts into the pipeline's [`TrackInfo`] with sensible defaults for
/// fields a caller doesn't know yet (album position, favorite flag).
#[derive(Debug, Deserialize)]
pub struct TrackInfoRequest {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub album_id: Option<String>,
    #[serde(default)]
    pub track_number: Option<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub length_milliseconds: Option<i64>,
    #[serde(default)]
    pub fade_duration_seconds: Option<i64>,
    #[serde(default)]
    pub radio_station: bool,
    #[serde(default)]
    pub favorite: bool,
}

impl From<TrackInfoRequest> for TrackInfo {
    fn from(r: TrackInfoRequest) -> Self {
        TrackInfo {
            id: r.id,
            url: r.url,
            title: r.title,
            artist: r.artist,
            album: r.album,
            album_id: r.album_id,
            track_number: r.track_number,
            tags: r.tags,
            length_milliseconds: r.length_milliseconds,
            fade_duration_seconds: r.fade_duration_seconds,
            radio_station: r.radio_station,
            favorite: r.favorite,
        }
    }
}

#[derive(Serialize)]
pub struct TrackInfoResponse {
    id: String,
    title: String,
    artist: String,
    album: String,
    tags: Vec<String>,
    length_milliseconds: Option<i64>,
    favorite: bool,
}

impl From<&TrackInfo> for TrackInfoResponse {
    fn from(t: &TrackInfo) -> Self {
        Self {
            id: t.id.clone(),
            title: t.title.clone(),
            artist: t.artist.clone(),
            album: t.album.clone(),
            tags: t.tags.clone(),
            length_milliseconds: t.length_milliseconds,
            favorite: t.favorite,
        }
    }
}

pub async fn get_playlist(State(state): State<SharedState>) -> Json<Vec<TrackInfoResponse>> {
    let playlist = state.controller.playlist_snapshot();
    Json(playlist.iter().map(TrackInfoResponse::from).collect())
}

pub async fn enqueue(
    State(state): State<SharedState>,
    Json(tracks): Json<Vec<TrackInfoRequest>>,
) -> Result<StatusCode, (StatusCode, String)> {
    let infos = tracks.into_iter().map(TrackInfo::from).collect();
    state
        .controller
        .enqueue(infos)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn remove_from_playlist(
    State(state): State<SharedState>,
    Path(track_id): Path<String>,
) -> StatusCode {
    if state.controller.remove_from_playlist(&track_id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn play(
    State(state): State<SharedState>,
    Json(track): Json<TrackInfoRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .controller
        .play(track.into())
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn pause(State(state): State<SharedState>) -> StatusCode {
    state.controller.pause();
    StatusCode::NO_CONTENT
}

pub async fn resume(State(state): State<SharedState>) -> StatusCode {
    state.controller.resume();
    StatusCode::NO_CONTENT
}

pub async fn skip(State(state): State<SharedState>) -> Result<StatusCode, (StatusCode, String)> {
    state
        .controller
        .next()
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[derive(Deserialize)]
pub struct PreviousRequest {
    #[serde(default)]
    pub index: usize,
}

pub async fn previous(
    State(state): State<SharedState>,
    Json(req): Json<PreviousRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .controller
        .previous(req.index)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn stop(State(state): State<SharedState>) -> StatusCode {
    state.controller.stop();
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
pub struct SeekRequest {
    pub percent: f64,
}

pub async fn seek(State(state): State<SharedState>, Json(req): Json<SeekRequest>) -> StatusCode {
    state.controller.seek(req.percent);
    StatusCode::NO_CONTENT
}

pub async fn get_state(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({
        "track_id": state.controller.current_track_id(),
        "status": state.controller.current_status(),
        "position_ms": state.controller.last_position_milliseconds(),
    }))
}
