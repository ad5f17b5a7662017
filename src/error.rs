//! Error taxonomy for the serve pipeline and its collaborators.
//!
//! Every failure is a [`ServeError`] carrying the operation that failed, the
//! request path when applicable, and an optional underlying cause. The HTTP
//! boundary maps the kind to a status code and emits a safe public message;
//! diagnostics travel in an [`ErrorReport`] response extension consumed by
//! the logging middleware.

use std::error::Error as StdError;
use std::fmt;

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Category of a serve failure, mapped onto HTTP statuses at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request: bad method, oversized path, oversized body or file.
    Validation,
    /// Missing file, or a directory without an index while browsing is off.
    NotFound,
    /// Unreadable file or a forbidden location.
    Permission,
    /// Per-client request budget exhausted.
    RateLimit,
    /// Traversal attempt, canonical-root escape, suspicious token.
    Security,
    /// Request deadline exceeded.
    Timeout,
    /// Unexpected I/O failure, encoder crash, or internal invariant breach.
    Server,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Permission => StatusCode::FORBIDDEN,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Security => StatusCode::FORBIDDEN,
            ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::Server => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(self) -> &'static str {
        match self {
            ErrorKind::Validation => "Invalid request",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::Permission => "Permission denied",
            ErrorKind::RateLimit => "Too many requests. Please try again later",
            ErrorKind::Security => "Request rejected",
            ErrorKind::Timeout => "Request timed out",
            ErrorKind::Server => "An internal error occurred",
        }
    }

    /// Only transient failures may be retried; client-caused kinds never are.
    pub fn is_retriable(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Server)
    }
}

/// A serve failure with request context attached.
#[derive(Debug)]
pub struct ServeError {
    pub kind: ErrorKind,
    pub operation: &'static str,
    pub path: Option<String>,
    pub message: String,
    pub status: StatusCode,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ServeError {
    pub fn new(kind: ErrorKind, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation,
            path: None,
            message: message.into(),
            status: kind.status(),
            source: None,
        }
    }

    pub fn validation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, operation, message)
    }

    pub fn not_found(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, operation, message)
    }

    pub fn permission(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, operation, message)
    }

    pub fn security(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, operation, message)
    }

    pub fn timeout(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, operation, message)
    }

    pub fn server(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, operation, message)
    }

    /// Attach the request path the failure relates to.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Override the status the kind would pick by default.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Classify an I/O failure from a disk operation.
    pub fn from_io(operation: &'static str, path: &str, err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::Permission,
            _ => ErrorKind::Server,
        };
        Self::new(kind, operation, err.to_string())
            .with_path(path)
            .with_source(err)
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }

    /// Build the HTTP response for this error.
    ///
    /// The body carries the kind's safe message unless `debug` is set, in
    /// which case operation and cause detail are included. Rate-limited
    /// responses advertise `Retry-After`.
    pub fn into_response_with(self, debug: bool) -> Response {
        let status = self.status;
        let body = if debug {
            let mut detail = format!("{}\nOperation: {}", self.kind.public_message(), self.operation);
            if let Some(path) = &self.path {
                detail.push_str(&format!("\nPath: {path}"));
            }
            detail.push_str(&format!("\nError: {}", self.message));
            detail
        } else {
            self.kind.public_message().to_string()
        };

        let report = ErrorReport::from_serve_error(&self);
        let mut response = (status, body).into_response();
        if self.kind == ErrorKind::RateLimit {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("60"));
        }
        report.attach(&mut response);
        response
    }
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {} ({path})", self.operation, self.message),
            None => write!(f, "{}: {}", self.operation, self.message),
        }
    }
}

impl StdError for ServeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn StdError + 'static))
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        self.into_response_with(false)
    }
}

/// Diagnostic payload attached to error responses as a response extension.
///
/// The logging middleware pulls this back out to log the full error chain
/// without leaking it to the client.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub operation: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_serve_error(error: &ServeError) -> Self {
        let mut messages = vec![error.message.clone()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            operation: error.operation,
            status: error.status,
            messages,
        }
    }

    pub fn from_message(
        operation: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}
