//! Versioned-asset scenarios: HTML rewriting, immutable responses, and
//! registration of assets discovered after startup.

use std::path::Path;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use statico::cache::AssetCache;
use statico::config::Settings;
use statico::http::{AppState, build_router};
use tempfile::TempDir;
use tower::ServiceExt;

fn versioned_settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.server.root = root.to_path_buf();
    settings.limits.rate_limit_per_ip = 0;
    settings.versioning.enable = true;
    settings
}

fn seed_site(root: &Path) {
    let statics = root.join("static");
    std::fs::create_dir_all(&statics).unwrap();
    std::fs::write(statics.join("app.js"), b"console.log('hi');").unwrap();
    std::fs::write(
        root.join("index.html"),
        br#"<html><head></head><body><script src="/static/app.js"></script></body></html>"#,
    )
    .unwrap();
}

fn build_app(settings: Settings) -> (AppState, Router) {
    let state = AppState::new(settings, None).expect("state builds");
    let router = build_router(state.clone());
    (state, router)
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

fn header_str<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn html_references_are_rewritten_to_versioned_paths() {
    let root = TempDir::new().unwrap();
    seed_site(root.path());
    let (state, app) = build_app(versioned_settings(root.path()));

    let versioned = state
        .versions
        .versioned("/static/app.js")
        .expect("scan registered the script");

    let response = get(&app, "/index.html").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;

    assert!(body.contains(&format!(r#"src="{versioned}""#)), "body: {body}");
    assert!(!body.contains(r#"src="/static/app.js""#), "body: {body}");
}

#[tokio::test]
async fn versioned_path_serves_identical_content_with_immutable_header() {
    let root = TempDir::new().unwrap();
    seed_site(root.path());
    let (state, app) = build_app(versioned_settings(root.path()));

    let versioned = state.versions.versioned("/static/app.js").unwrap();
    let response = get(&app, &versioned).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "cache-control"),
        Some("public, max-age=31536000, immutable")
    );
    assert_eq!(body_string(response).await, "console.log('hi');");
}

#[tokio::test]
async fn logical_path_still_serves_with_static_max_age() {
    let root = TempDir::new().unwrap();
    seed_site(root.path());
    let (_, app) = build_app(versioned_settings(root.path()));

    let response = get(&app, "/static/app.js").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "cache-control"),
        Some("public, max-age=86400")
    );
}

#[tokio::test]
async fn assets_created_after_startup_register_on_first_request() {
    let root = TempDir::new().unwrap();
    seed_site(root.path());
    let (state, app) = build_app(versioned_settings(root.path()));

    // Written after the startup scan, so only a request can register it.
    std::fs::write(root.path().join("static/late.css"), b"body{margin:0}").unwrap();
    assert!(state.versions.versioned("/static/late.css").is_none());

    let response = get(&app, "/static/late.css").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.versions.versioned("/static/late.css").is_some());
}

#[tokio::test]
async fn versioned_and_logical_flavors_cache_separately() {
    let root = TempDir::new().unwrap();
    seed_site(root.path());
    let (state, app) = build_app(versioned_settings(root.path()));

    let versioned = state.versions.versioned("/static/app.js").unwrap();

    let logical = get(&app, "/static/app.js").await;
    let flavored = get(&app, &versioned).await;

    assert_eq!(
        header_str(&logical, "cache-control"),
        Some("public, max-age=86400")
    );
    assert_eq!(
        header_str(&flavored, "cache-control"),
        Some("public, max-age=31536000, immutable")
    );

    // Same bytes on both flavors.
    assert_eq!(body_string(logical).await, "console.log('hi');");
    assert_eq!(body_string(flavored).await, "console.log('hi');");
    assert_eq!(state.cache.stats().item_count, 2);
}

#[tokio::test]
async fn rewriting_is_skipped_when_versioning_is_disabled() {
    let root = TempDir::new().unwrap();
    seed_site(root.path());

    let mut settings = versioned_settings(root.path());
    settings.versioning.enable = false;
    let (_, app) = build_app(settings);

    let response = get(&app, "/index.html").await;
    let body = body_string(response).await;
    assert!(body.contains(r#"src="/static/app.js""#));
}
