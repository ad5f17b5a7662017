//! HTTP surface: application state, router assembly, and the operational
//! endpoints (`/health`, `/metrics`).

mod middleware;
mod pipeline;
mod policy;
mod validate;

pub use middleware::{RateLimiter, RequestId};
pub use pipeline::serve_asset;
pub use policy::cache_control;
pub use validate::{decode_path, resolve_under_root, validate_path};

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::cache::{self, AssetCache};
use crate::compress::EncoderPool;
use crate::config::Settings;
use crate::error::ServeError;
use crate::version::{HtmlRewriter, VersionIndex};

/// Shared per-request state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub canonical_root: Arc<PathBuf>,
    pub cache: Arc<dyn AssetCache>,
    pub encoders: Arc<EncoderPool>,
    pub versions: Arc<VersionIndex>,
    pub rewriter: Arc<HtmlRewriter>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build the serving state from resolved settings.
    ///
    /// Canonicalizes the content root (it must exist) and, when versioning
    /// is enabled, performs the initial directory scan.
    pub fn new(
        settings: Settings,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, ServeError> {
        let canonical_root = settings.server.root.canonicalize().map_err(|err| {
            ServeError::from_io(
                "http.state",
                &settings.server.root.to_string_lossy(),
                err,
            )
        })?;

        let cache = cache::new_store(&settings.cache);
        let encoders = Arc::new(EncoderPool::new(settings.compression.clone()));
        let versions = Arc::new(VersionIndex::new(settings.versioning.clone()));
        let rewriter = Arc::new(HtmlRewriter::new(versions.clone()));

        if versions.enabled() {
            versions.scan(&canonical_root);
        }

        let rate_limiter = (settings.limits.rate_limit_per_ip > 0)
            .then(|| Arc::new(RateLimiter::new(settings.limits.rate_limit_per_ip)));

        Ok(Self {
            settings: Arc::new(settings),
            canonical_root: Arc::new(canonical_root),
            cache,
            encoders,
            versions,
            rewriter,
            rate_limiter,
            metrics,
        })
    }
}

/// Assemble the router with the full middleware stack.
pub fn build_router(state: AppState) -> Router {
    let max_body_size = state.settings.limits.max_body_size;
    let mut router = Router::new().route("/health", get(health));

    if state.settings.metrics.enable {
        let endpoint = state.settings.metrics.endpoint.clone();
        router = router.route(&endpoint, get(render_metrics));
    }

    router
        .fallback(pipeline::serve_asset)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::enforce_timeout,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::enforce_rate_limit,
        ))
        .layer(from_fn_with_state(state.clone(), middleware::apply_cors))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::apply_security_headers,
        ))
        .layer(from_fn(middleware::log_responses))
        .layer(from_fn(middleware::track_requests))
        .layer(from_fn(middleware::set_request_id))
        .layer(DefaultBodyLimit::max(max_body_size as usize))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.as_ref() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
