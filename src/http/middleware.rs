//! Request middleware: security headers, CORS, rate limiting, request IDs,
//! outcome logging, timing metrics, and the request deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use tracing::{error, warn};

use crate::error::{ErrorKind, ErrorReport, ServeError};
use crate::metrics::{ACTIVE_CONNECTIONS, REQUEST_DURATION_SECONDS, REQUESTS_TOTAL};

use super::AppState;

const DEFAULT_CSP: &str = "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; \
     img-src 'self' data: https:; font-src 'self'; connect-src 'self'; media-src 'self'; \
     object-src 'none'; frame-src 'none'; base-uri 'self'; form-action 'self'; \
     frame-ancestors 'none'; upgrade-insecure-requests;";

/// Request ID propagated through extensions into error reports and logs.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

// ============================================================================
// Rate limiting
// ============================================================================

/// Per-client sliding-window rate limiter.
///
/// Tracks request instants per client IP over a one-second window; the limit
/// is the configured requests-per-second budget.
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    buckets: DashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32) -> Self {
        Self {
            window: Duration::from_secs(1),
            max_requests,
            buckets: DashMap::new(),
        }
    }

    pub fn allow(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(client.to_string()).or_default();
        bucket.retain(|instant| now.duration_since(*instant) < self.window);

        if bucket.len() as u32 >= self.max_requests {
            return false;
        }
        bucket.push(now);
        true
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }
}

pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(limiter) = state.rate_limiter.as_ref() else {
        return next.run(request).await;
    };

    let client = client_ip(&request);
    if !limiter.allow(&client) {
        warn!(
            target: "statico::http::rate_limit",
            client = %client,
            limit = limiter.limit(),
            "request rejected by rate limiter"
        );
        let mut response = ServeError::new(
            ErrorKind::RateLimit,
            "middleware.rate_limit",
            format!("client `{client}` exceeded {} requests/s", limiter.limit()),
        )
        .into_response_with(state.settings.debug);
        if let Ok(value) = HeaderValue::from_str(&limiter.limit().to_string()) {
            response.headers_mut().insert("X-RateLimit-Limit", value);
        }
        return response;
    }

    next.run(request).await
}

fn client_ip(request: &Request<Body>) -> String {
    if let Some(forwarded) = header_str(request, "X-Forwarded-For") {
        let first = forwarded.split(',').next().unwrap_or("").trim();
        if is_plausible_ip(first) {
            return first.to_string();
        }
    }
    if let Some(real_ip) = header_str(request, "X-Real-IP")
        && is_plausible_ip(real_ip)
    {
        return real_ip.to_string();
    }
    if let Some(info) = request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
    {
        return info.0.ip().to_string();
    }
    "unknown".to_string()
}

fn header_str<'a>(request: &'a Request<Body>, name: &str) -> Option<&'a str> {
    request.headers().get(name)?.to_str().ok()
}

fn is_plausible_ip(candidate: &str) -> bool {
    let trimmed = candidate.trim_matches(['[', ']']);
    if trimmed.is_empty() || trimmed.len() > 45 {
        return false;
    }
    trimmed
        .chars()
        .all(|c| c.is_ascii_hexdigit() || c == '.' || c == ':')
}

// ============================================================================
// Security headers and CORS
// ============================================================================

pub async fn apply_security_headers(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let security = &state.settings.security;

    let headers = response.headers_mut();
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "Permissions-Policy",
        HeaderValue::from_static(
            "accelerometer=(), camera=(), geolocation=(), gyroscope=(), magnetometer=(), \
             microphone=(), payment=(), usb=()",
        ),
    );

    let csp = if security.csp.is_empty() {
        HeaderValue::from_static(DEFAULT_CSP)
    } else {
        match HeaderValue::from_str(&security.csp) {
            Ok(value) => value,
            Err(_) => HeaderValue::from_static(DEFAULT_CSP),
        }
    };
    headers.insert("Content-Security-Policy", csp);

    if security.hsts {
        headers.insert(
            "Strict-Transport-Security",
            HeaderValue::from_static("max-age=63072000; includeSubDomains; preload"),
        );
    }

    response
}

pub async fn apply_cors(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let security = &state.settings.security;
    let origin = header_str(&request, "Origin").map(str::to_string);
    let preflight = request.method() == Method::OPTIONS;

    let mut response = if preflight {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    match origin {
        Some(origin) if security.allowed_origins.iter().any(|a| a == &origin) => {
            if let Ok(value) = HeaderValue::from_str(&origin) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }
        _ if security.allowed_origins.iter().any(|a| a == "*") => {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            );
        }
        _ => {}
    }

    if let Ok(methods) = HeaderValue::from_str(&security.allowed_methods.join(", ")) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, methods);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("3600"),
    );

    response
}

// ============================================================================
// Request IDs, logging, metrics, deadline
// ============================================================================

pub async fn set_request_id(mut request: Request<Body>, next: Next) -> Response {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let id = format!("{unix}-{seq}");

    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("X-Request-ID", value);
    }
    response
}

pub async fn track_requests(request: Request<Body>, next: Next) -> Response {
    counter!(REQUESTS_TOTAL).increment(1);
    gauge!(ACTIVE_CONNECTIONS).increment(1.0);
    let start = Instant::now();

    let response = next.run(request).await;

    histogram!(REQUEST_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
    gauge!(ACTIVE_CONNECTIONS).decrement(1.0);
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let start = Instant::now();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (operation, messages) = match report {
            Some(report) => (report.operation, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target: "statico::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                operation = operation,
                detail = %detail,
                chain = ?messages,
                request_id = %request_id,
                "request failed",
            );
        } else {
            warn!(
                target: "statico::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                operation = operation,
                detail = %detail,
                request_id = %request_id,
                "client request error",
            );
        }
    }

    response
}

/// Bound request handling by the configured read timeout.
pub async fn enforce_timeout(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let deadline = state.settings.timeouts.read;
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ServeError::timeout(
            "middleware.timeout",
            format!("request exceeded {}s deadline", deadline.as_secs()),
        )
        .into_response_with(state.settings.debug),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_enforces_budget_within_window() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));

        // Other clients have their own budget.
        assert!(limiter.allow("10.0.0.2"));
    }

    #[test]
    fn plausible_ip_check() {
        assert!(is_plausible_ip("192.168.1.1"));
        assert!(is_plausible_ip("::1"));
        assert!(is_plausible_ip("[2001:db8::1]"));
        assert!(!is_plausible_ip("not an ip"));
        assert!(!is_plausible_ip(""));
        assert!(!is_plausible_ip(&"1".repeat(64)));
    }
}
