//! End-to-end serve logic.
//!
//! Each request flows validate → resolve → negotiate → lookup → (on miss)
//! read → classify → rewrite → encode → insert → conditional → emit. The
//! cache key is the `(logical path, negotiated encoding, versioned flavor)`
//! triple; a hit replays the stored artifact with fresh per-request headers.

use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::counter;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::{AssetEntry, AssetKey};
use crate::compress::Encoding;
use crate::error::ServeError;
use crate::metrics::{BYTES_SERVED_TOTAL, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

use super::{AppState, policy, validate};

const SNIFF_WINDOW: usize = 512;

/// Fallback handler serving files under the content root.
pub async fn serve_asset(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, _body) = request.into_parts();
    match serve(&state, &parts).await {
        Ok(response) => response,
        Err(error) => error.into_response_with(state.settings.debug),
    }
}

async fn serve(state: &AppState, request: &Parts) -> Result<Response, ServeError> {
    let method = &request.method;
    if method == &Method::OPTIONS {
        // Preflight is normally answered by the CORS layer before reaching
        // the handler.
        return Ok(StatusCode::OK.into_response());
    }
    if method != &Method::GET && method != &Method::HEAD {
        return Err(ServeError::validation(
            "pipeline.method",
            format!("method {method} not allowed"),
        )
        .with_status(StatusCode::METHOD_NOT_ALLOWED));
    }

    let raw_path = request.uri.path();
    validate::validate_path(raw_path)?;
    let decoded = validate::decode_path(raw_path);
    validate::validate_path(&decoded)?;
    reject_oversized_body(state, request)?;

    // A hit in the inverse map means the request arrived on a versioned URL;
    // everything downstream works with the underlying logical path.
    let (logical, versioned_flavor) = match state.versions.original(&decoded) {
        Some(original) => (original, true),
        None => (decoded.clone(), false),
    };

    let accept_encoding = request
        .headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let encoding = state.encoders.choose(accept_encoding);

    let key = AssetKey::new(logical.clone(), encoding, versioned_flavor);
    if let Some(entry) = state.cache.get(&key) {
        counter!(CACHE_HITS_TOTAL).increment(1);
        debug!(
            target: "statico::http::pipeline",
            path = %logical,
            versioned = versioned_flavor,
            "serving from cache"
        );
        return Ok(emit(state, request, &entry, &logical, versioned_flavor));
    }
    counter!(CACHE_MISSES_TOTAL).increment(1);

    let resolved = validate::resolve_under_root(&state.canonical_root, &logical)?;
    let (file_path, metadata) = target_file(state, resolved, &logical).await?;
    let Some(metadata) = metadata else {
        // Directory without an index: listing when browsing is on.
        return directory_listing(&file_path, &decoded).await;
    };

    if metadata.len() > state.settings.limits.max_file_size {
        return Err(ServeError::validation(
            "pipeline.read",
            format!(
                "file size {} exceeds the {} byte limit",
                metadata.len(),
                state.settings.limits.max_file_size
            ),
        )
        .with_path(&logical)
        .with_status(StatusCode::PAYLOAD_TOO_LARGE));
    }

    let data = tokio::fs::read(&file_path)
        .await
        .map_err(|err| ServeError::from_io("pipeline.read", &logical, err))?;
    let content_type = detect_content_type(&file_path, &data);
    let last_modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());

    if state.versions.enabled() && !versioned_flavor && state.versions.is_versionable(&logical) {
        state.versions.register(&logical, &data);
    }

    // HTML served via its logical path gets its asset references rewritten;
    // the ETag must cover the rewritten bytes.
    let mut body = data;
    if content_type.starts_with("text/html") && !versioned_flavor {
        body = state.rewriter.rewrite(&body, &logical);
    }
    let etag = quoted_etag(&body);

    let mut applied = Encoding::Identity;
    if encoding != Encoding::Identity
        && state
            .encoders
            .should_compress(&content_type, body.len() as u64)
    {
        match state.encoders.encode(&body, encoding) {
            Ok(compressed) => {
                body = compressed;
                applied = encoding;
            }
            Err(err) => {
                warn!(
                    target: "statico::http::pipeline",
                    path = %logical,
                    error = %err,
                    "encoding failed; serving identity"
                );
            }
        }
    }

    let entry = AssetEntry {
        bytes: Bytes::from(body),
        content_type,
        encoding: applied,
        etag,
        last_modified,
        created_at: Instant::now(),
        access_count: 0,
    };
    state.cache.set(key, entry.clone());

    Ok(emit(state, request, &entry, &logical, versioned_flavor))
}

fn reject_oversized_body(state: &AppState, request: &Parts) -> Result<(), ServeError> {
    let declared = request
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);

    if declared > state.settings.limits.max_body_size {
        return Err(ServeError::validation(
            "pipeline.body",
            format!(
                "request body of {declared} bytes exceeds the {} byte limit",
                state.settings.limits.max_body_size
            ),
        )
        .with_status(StatusCode::PAYLOAD_TOO_LARGE));
    }
    Ok(())
}

/// Retarget a directory hit to its index file.
///
/// Returns `(path, None)` when the target is a directory without an index,
/// leaving the listing decision to the caller.
async fn target_file(
    state: &AppState,
    resolved: PathBuf,
    logical: &str,
) -> Result<(PathBuf, Option<std::fs::Metadata>), ServeError> {
    let metadata = tokio::fs::metadata(&resolved)
        .await
        .map_err(|err| ServeError::from_io("pipeline.stat", logical, err))?;

    if !metadata.is_dir() {
        return Ok((resolved, Some(metadata)));
    }

    let index_path = resolved.join(&state.settings.server.index_file);
    match tokio::fs::metadata(&index_path).await {
        Ok(index_metadata) if index_metadata.is_file() => Ok((index_path, Some(index_metadata))),
        _ if state.settings.server.allow_browsing => Ok((resolved, None)),
        _ => Err(ServeError::not_found(
            "pipeline.stat",
            "directory has no index file",
        )
        .with_path(logical)),
    }
}

async fn directory_listing(dir: &Path, url_path: &str) -> Result<Response, ServeError> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .map_err(|err| ServeError::from_io("pipeline.listing", url_path, err))?;

    let mut names = Vec::new();
    while let Some(item) = reader
        .next_entry()
        .await
        .map_err(|err| ServeError::from_io("pipeline.listing", url_path, err))?
    {
        let mut name = item.file_name().to_string_lossy().into_owned();
        if item.file_type().await.is_ok_and(|ft| ft.is_dir()) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    let mut html = format!(
        "<html><head><title>Directory listing for {url_path}</title></head><body>\
         <h1>Directory listing for {url_path}</h1><ul>"
    );
    if url_path != "/" {
        html.push_str(r#"<li><a href="../">../</a></li>"#);
    }
    for name in names {
        html.push_str(&format!(r#"<li><a href="{name}">{name}</a></li>"#));
    }
    html.push_str("</ul></body></html>");

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(html))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

/// Build the final response, honoring conditional headers.
fn emit(
    state: &AppState,
    request: &Parts,
    entry: &AssetEntry,
    policy_path: &str,
    versioned: bool,
) -> Response {
    let cache_control = policy::cache_control(policy_path, versioned, &state.settings.cache_control);

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, entry.content_type.as_str())
        .header(header::ETAG, entry.etag.as_str())
        .header(
            header::LAST_MODIFIED,
            httpdate::fmt_http_date(entry.last_modified),
        )
        .header(header::CACHE_CONTROL, cache_control);

    if let Some(content_encoding) = entry.encoding.content_encoding() {
        builder = builder
            .header(header::CONTENT_ENCODING, content_encoding)
            .header(header::VARY, "Accept-Encoding");
    }

    if not_modified(request, entry) {
        return builder
            .status(StatusCode::NOT_MODIFIED)
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    builder = builder.header(header::CONTENT_LENGTH, entry.bytes.len());

    if request.method == Method::HEAD {
        return builder
            .status(StatusCode::OK)
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    counter!(BYTES_SERVED_TOTAL).increment(entry.bytes.len() as u64);
    builder
        .status(StatusCode::OK)
        .body(Body::from(entry.bytes.clone()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// `If-None-Match` wins over `If-Modified-Since`; ETag comparison is exact.
fn not_modified(request: &Parts, entry: &AssetEntry) -> bool {
    if let Some(candidate) = request
        .headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
    {
        return candidate == entry.etag;
    }

    if let Some(since) = request
        .headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| httpdate::parse_http_date(value).ok())
    {
        // HTTP dates carry whole seconds; compare at that resolution.
        let modified_secs = unix_seconds(entry.last_modified);
        let since_secs = unix_seconds(since);
        return modified_secs <= since_secs;
    }

    false
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn quoted_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", hex::encode(digest))
}

/// Content type by extension, falling back to sniffing the first bytes.
fn detect_content_type(path: &Path, data: &[u8]) -> String {
    match mime_guess::from_path(path).first() {
        Some(mime) => mime.essence_str().to_string(),
        None => sniff_content_type(data).to_string(),
    }
}

fn sniff_content_type(data: &[u8]) -> &'static str {
    let head = &data[..data.len().min(SNIFF_WINDOW)];

    const MAGIC: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1f\x8b", "application/gzip"),
    ];
    for (magic, content_type) in MAGIC {
        if head.starts_with(magic) {
            return content_type;
        }
    }

    if let Ok(text) = std::str::from_utf8(head) {
        let trimmed = text.trim_start();
        let lowered = trimmed.get(..15).unwrap_or(trimmed).to_ascii_lowercase();
        if lowered.starts_with("<!doctype html") || lowered.starts_with("<html") {
            return "text/html";
        }
        return "text/plain";
    }

    "application/octet-stream"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_is_quoted_and_content_addressed() {
        let one = quoted_etag(b"hi");
        let two = quoted_etag(b"hi");
        let other = quoted_etag(b"HI");

        assert_eq!(one, two);
        assert_ne!(one, other);
        assert!(one.starts_with('"') && one.ends_with('"'));
    }

    #[test]
    fn content_type_prefers_extension() {
        assert!(detect_content_type(Path::new("/a/app.js"), b"whatever").contains("javascript"));
        assert_eq!(
            detect_content_type(Path::new("/a/site.css"), b"body{}"),
            "text/css"
        );
        assert_eq!(
            detect_content_type(Path::new("/a/page.html"), b""),
            "text/html"
        );
    }

    #[test]
    fn sniffing_covers_magic_bytes_and_text() {
        assert_eq!(sniff_content_type(b"\x89PNG\r\n\x1a\nrest"), "image/png");
        assert_eq!(sniff_content_type(b"\xff\xd8\xffrest"), "image/jpeg");
        assert_eq!(sniff_content_type(b"%PDF-1.7"), "application/pdf");
        assert_eq!(
            sniff_content_type(b"<!DOCTYPE html><html></html>"),
            "text/html"
        );
        assert_eq!(sniff_content_type(b"  <html lang=\"en\">"), "text/html");
        assert_eq!(sniff_content_type(b"plain words"), "text/plain");
        assert_eq!(
            sniff_content_type(&[0xC0, 0xFF, 0x11, 0x22]),
            "application/octet-stream"
        );
    }

    #[test]
    fn unix_seconds_truncates_to_whole_seconds() {
        let time = UNIX_EPOCH + std::time::Duration::from_millis(1_500);
        assert_eq!(unix_seconds(time), 1);
    }
}
