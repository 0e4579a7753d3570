use std::sync::Arc;

use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::middleware::{CsrfGuard, RateLimiter};

/// The shared application state.
///
/// Built once at the application root and handed to the router, so every request sees
/// the same bucket registry and guard settings. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// The resolved configuration.
    pub config: Arc<AppConfig>,
    /// Per-client token buckets.
    pub rate_limiter: RateLimiter,
    /// Double-submit token issuer and validator.
    pub csrf: CsrfGuard,
    pub metrics: Metrics,
}

impl AppState {
    /// Creates a new `AppState` from a validated configuration.
    ///
    /// Fails only when the CSRF header name cannot be used as an HTTP header.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let rate_limiter = RateLimiter::from_config(&config.rate_limit);
        let csrf = CsrfGuard::new(&config.csrf, config.server.trust_proxy_headers)?;

        Ok(Self { config: Arc::new(config), rate_limiter, csrf, metrics: Metrics::new() })
    }
}
