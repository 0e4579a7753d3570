//! # Farm Manager web tier
//!
//! Request guards and server assembly for the farm management application. The
//! domain screens (barns, flocks, staff, feed, health checks, orders, ...) plug into
//! [`app::build_router`] and inherit the guard pipeline.
//!
//! ## Core Components
//!
//! - [`config`]: Layered configuration (embedded defaults, files, environment)
//! - [`error`]: Error type and JSON error responses
//! - [`metrics`]: Guard counters
//! - [`middleware`]: Rate limiting, CSRF protection, security headers, client identity
//! - [`routes`]: Health, metrics and CSRF bootstrap endpoints
//! - [`state`]: Shared application state
//! - [`app`]: Router and middleware stack

pub mod app;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

#[cfg(test)]
mod tests;
