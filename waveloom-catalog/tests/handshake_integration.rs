//! Exercises the handshake round trip against a real HTTP server standing in
//! for an Ampache instance, rather than just unit-testing the XML parser.

use axum::extract::Query;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use waveloom_catalog::session::handshake;

async fn spawn_fake_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn handshake_succeeds_against_a_well_formed_reply() {
    let router = Router::new().route(
        "/server/xml.server.php",
        get(|| async {
            (
                [("content-type", "text/xml")],
                r#"<root><auth>session-token</auth><api>6.0.1</api><songs>120</songs></root>"#,
            )
        }),
    );
    let host = spawn_fake_server(router).await;

    let session = handshake(&reqwest::Client::new(), &host, "alice", "hunter2", 1_700_000_000)
        .await
        .unwrap();

    assert_eq!(session.auth, "session-token");
    assert_eq!(session.api_version, 6_000_001);
    assert_eq!(session.song_count, 120);
}

#[tokio::test]
async fn handshake_rejects_an_api_version_below_the_minimum() {
    let router = Router::new().route(
        "/server/xml.server.php",
        get(|| async {
            (
                [("content-type", "text/xml")],
                r#"<root><auth>session-token</auth><api>4.2.0</api></root>"#,
            )
        }),
    );
    let host = spawn_fake_server(router).await;

    let err = handshake(&reqwest::Client::new(), &host, "alice", "hunter2", 1_700_000_000)
        .await
        .unwrap_err();

    assert!(matches!(err, waveloom_catalog::CatalogError::ApiTooOld { version } if version == 4_002_000));
}

#[tokio::test]
async fn handshake_surfaces_a_server_reported_error() {
    let router = Router::new().route(
        "/server/xml.server.php",
        get(|| async { ([("content-type", "text/xml")], r#"<root><error code="401">Invalid Login</error></root>"#) }),
    );
    let host = spawn_fake_server(router).await;

    let err = handshake(&reqwest::Client::new(), &host, "alice", "wrong-password", 1_700_000_000)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        waveloom_catalog::CatalogError::ServerError { code: 401, .. }
    ));
}

#[tokio::test]
async fn handshake_auth_hash_changes_with_the_password() {
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_for_handler = seen.clone();
    let last_auth: Arc<std::sync::Mutex<String>> = Arc::new(std::sync::Mutex::new(String::new()));
    let last_auth_for_handler = last_auth.clone();

    let router = Router::new().route(
        "/server/xml.server.php",
        get(move |Query(params): Query<HashMap<String, String>>| {
            let seen = seen_for_handler.clone();
            let last_auth = last_auth_for_handler.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                *last_auth.lock().unwrap() = params.get("auth").cloned().unwrap_or_default();
                (
                    [("content-type", "text/xml")],
                    r#"<root><auth>session-token</auth><api>6.0.0</api></root>"#,
                )
            }
        }),
    );
    let host = spawn_fake_server(router).await;
    let http = reqwest::Client::new();

    handshake(&http, &host, "alice", "password-one", 1_700_000_000).await.unwrap();
    let first_auth = last_auth.lock().unwrap().clone();

    handshake(&http, &host, "alice", "password-two", 1_700_000_000).await.unwrap();
    let second_auth = last_auth.lock().unwrap().clone();

    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_ne!(first_auth, second_auth);
}
