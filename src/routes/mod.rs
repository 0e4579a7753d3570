//! HTTP route handlers.
//!
//! - `health`: liveness, version and guard metrics endpoints
//! - `csrf`: token bootstrap for script clients

pub mod csrf;
pub mod health;
