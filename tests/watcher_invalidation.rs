//! Watcher-driven invalidation against a real file system.
//!
//! These tests poll with generous deadlines because file-system event
//! delivery latency varies across platforms.

use std::path::Path;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::Request,
    response::Response,
};
use statico::config::Settings;
use statico::http::{AppState, build_router};
use statico::invalidate::spawn_watcher;
use tempfile::TempDir;
use tower::ServiceExt;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const POLL_DEADLINE: Duration = Duration::from_secs(10);

fn test_settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.server.root = root.to_path_buf();
    settings.limits.rate_limit_per_ip = 0;
    settings
}

async fn get(app: &Router, path: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(path)
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("infallible")
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body collects");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

fn etag_of(response: &Response) -> String {
    response
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .expect("etag set")
        .to_string()
}

#[tokio::test]
async fn file_change_invalidates_the_cached_entry() {
    let root = TempDir::new().unwrap();
    std::fs::write(root.path().join("hello.txt"), b"hi").unwrap();

    let state = AppState::new(test_settings(root.path()), None).unwrap();
    let app = build_router(state.clone());
    let watcher = spawn_watcher(
        (*state.canonical_root).clone(),
        state.cache.clone(),
        state.versions.clone(),
    )
    .expect("watcher starts");

    let first = get(&app, "/hello.txt").await;
    let first_etag = etag_of(&first);
    assert_eq!(body_string(first).await, "hi");

    std::fs::write(root.path().join("hello.txt"), b"HI").unwrap();

    // Wait out event delivery; the first request after invalidation must
    // read fresh bytes.
    let deadline = tokio::time::Instant::now() + POLL_DEADLINE;
    let mut latest_body = String::new();
    let mut latest_etag = String::new();
    while tokio::time::Instant::now() < deadline {
        let response = get(&app, "/hello.txt").await;
        latest_etag = etag_of(&response);
        latest_body = body_string(response).await;
        if latest_body == "HI" {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    assert_eq!(latest_body, "HI", "cache was not invalidated in time");
    assert_ne!(latest_etag, first_etag);

    watcher.stop().await;
}

#[tokio::test]
async fn file_change_refreshes_the_version_record() {
    let root = TempDir::new().unwrap();
    let statics = root.path().join("static");
    std::fs::create_dir_all(&statics).unwrap();
    std::fs::write(statics.join("app.js"), b"console.log('v1');").unwrap();

    let mut settings = test_settings(root.path());
    settings.versioning.enable = true;
    let state = AppState::new(settings, None).unwrap();
    let watcher = spawn_watcher(
        (*state.canonical_root).clone(),
        state.cache.clone(),
        state.versions.clone(),
    )
    .expect("watcher starts");

    let first = state
        .versions
        .versioned("/static/app.js")
        .expect("registered by startup scan");

    std::fs::write(statics.join("app.js"), b"console.log('v2');").unwrap();

    let deadline = tokio::time::Instant::now() + POLL_DEADLINE;
    let mut latest = first.clone();
    while tokio::time::Instant::now() < deadline {
        if let Some(current) = state.versions.versioned("/static/app.js") {
            latest = current;
            if latest != first {
                break;
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    assert_ne!(latest, first, "version record was not refreshed in time");
    assert_eq!(
        state.versions.original(&latest).as_deref(),
        Some("/static/app.js")
    );

    watcher.stop().await;
}

#[tokio::test]
async fn file_deletion_drops_the_version_record() {
    let root = TempDir::new().unwrap();
    let statics = root.path().join("static");
    std::fs::create_dir_all(&statics).unwrap();
    std::fs::write(statics.join("app.js"), b"console.log('hi');").unwrap();

    let mut settings = test_settings(root.path());
    settings.versioning.enable = true;
    let state = AppState::new(settings, None).unwrap();
    let watcher = spawn_watcher(
        (*state.canonical_root).clone(),
        state.cache.clone(),
        state.versions.clone(),
    )
    .expect("watcher starts");

    assert!(state.versions.versioned("/static/app.js").is_some());
    std::fs::remove_file(statics.join("app.js")).unwrap();

    let deadline = tokio::time::Instant::now() + POLL_DEADLINE;
    let mut removed = false;
    while tokio::time::Instant::now() < deadline {
        if state.versions.versioned("/static/app.js").is_none() {
            removed = true;
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    assert!(removed, "version record survived deletion");
    watcher.stop().await;
}
