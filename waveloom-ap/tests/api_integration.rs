//! Integration tests for the HTTP control plane, exercising the router
//! in-process with no bound socket.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use waveloom_ap::audio::AudioFormat;
use waveloom_ap::controller::{PlaybackController, PlaybackOptions};
use waveloom_ap::{api, SharedState};
use waveloom_common::events::EventBus;

fn setup() -> axum::Router {
    let event_bus = Arc::new(EventBus::new(64));
    let controller = PlaybackController::new(AudioFormat::CD_QUALITY, event_bus.clone(), PlaybackOptions::default());
    let state = SharedState::new(controller, event_bus, Vec::new());
    api::create_router(state)
}

async fn request(app: &axum::Router, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Option<Value>) {
    let mut builder = Request::builder().method(method).uri(path);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { None } else { Some(serde_json::from_slice(&bytes).unwrap()) };
    (status, json)
}

#[tokio::test]
async fn health_reports_ok() {
    let app = setup();
    let (status, body) = request(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["status"], "ok");
}

#[tokio::test]
async fn playlist_starts_empty_and_accepts_enqueue() {
    let app = setup();

    let (status, body) = request(&app, "GET", "/playlist", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap().as_array().unwrap().len(), 0);

    let track = json!([{
        "id": "track-1",
        "url": "file:///track-1.flac",
        "title": "Track One",
        "artist": "Artist",
        "album": "Album",
    }]);
    let (status, _) = request(&app, "POST", "/playlist", Some(track)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = request(&app, "GET", "/playlist", None).await;
    assert_eq!(status, StatusCode::OK);
    let playlist = body.unwrap();
    let tracks = playlist.as_array().unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0]["id"], "track-1");
}

#[tokio::test]
async fn remove_from_playlist_reports_not_found_for_unknown_track() {
    let app = setup();
    let (status, _) = request(&app, "DELETE", "/playlist/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn transport_play_switches_state_to_playing() {
    let app = setup();

    let (status, body) = request(&app, "GET", "/transport/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["track_id"], Value::Null);

    let track = json!({
        "id": "track-1",
        "url": "file:///track-1.flac",
        "title": "Track One",
        "artist": "Artist",
        "album": "Album",
    });
    let (status, _) = request(&app, "POST", "/transport/play", Some(track)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = request(&app, "GET", "/transport/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["track_id"], "track-1");
}

#[tokio::test]
async fn transport_pause_resume_and_stop_return_no_content() {
    let app = setup();
    for path in ["/transport/pause", "/transport/resume", "/transport/stop"] {
        let (status, _) = request(&app, "POST", path, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT, "{path} should succeed with no body");
    }
}

#[tokio::test]
async fn transport_seek_accepts_a_percent_body() {
    let app = setup();
    let (status, _) = request(&app, "POST", "/transport/seek", Some(json!({"percent": 42.0}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn transport_previous_defaults_index_to_zero() {
    let app = setup();
    let (status, _) = request(&app, "POST", "/transport/previous", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn equalizer_round_trips_through_get_and_set() {
    let app = setup();

    let (status, body) = request(&app, "GET", "/equalizer", None).await;
    assert_eq!(status, StatusCode::OK);
    let initial = body.unwrap();
    assert_eq!(initial["on"], false);

    let updated = json!({
        "on": true,
        "gains": initial["gains"],
        "pre_amp_db": -2.5,
        "wide_stereo_delay_ms": 12.0,
        "soft_clip": true,
    });
    let (status, _) = request(&app, "POST", "/equalizer", Some(updated)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = request(&app, "GET", "/equalizer", None).await;
    assert_eq!(status, StatusCode::OK);
    let body = body.unwrap();
    assert_eq!(body["on"], true);
    assert_eq!(body["pre_amp_db"], -2.5);
    assert_eq!(body["soft_clip"], true);
}

#[tokio::test]
async fn servers_crud_round_trips() {
    let app = setup();

    let (status, body) = request(&app, "GET", "/servers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap().as_array().unwrap().len(), 0);

    let server = json!({
        "host": "music.example.com",
        "user": "alice",
        "password_env": "AMPACHE_PASSWORD",
        "shuffle_tags": ["rock"],
    });
    let (status, _) = request(&app, "POST", "/servers", Some(server)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = request(&app, "GET", "/servers", None).await;
    assert_eq!(status, StatusCode::OK);
    let servers = body.unwrap();
    assert_eq!(servers.as_array().unwrap().len(), 1);
    assert_eq!(servers[0]["host"], "music.example.com");

    let (status, _) = request(&app, "DELETE", "/servers/music.example.com", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = request(&app, "DELETE", "/servers/music.example.com", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = setup();
    let (status, _) = request(&app, "GET", "/nonexistent", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
