//! Middleware components for HTTP request processing.
//!
//! The request guards live here: per-client rate limiting runs in front of every route,
//! CSRF validation in front of the application screens. Security headers and client
//! identification are shared helpers for the same pipeline.

pub mod csrf;
pub mod ip;
pub mod rate_limit;
pub mod security_headers;

pub use csrf::{CsrfGuard, CsrfToken};
pub use rate_limit::RateLimiter;

use axum::http::{header, HeaderMap};

/// Whether the client asked for JSON, in which case rejections use the JSON error envelope.
pub(crate) fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false)
}
