//! Integration and unit tests for the request pipeline.
//!
//! ## Test Modules
//!
//! - **api_tests**: Router-level tests of rate limiting, CSRF issuance and validation
//! - **config_tests**: Configuration loading, overrides and validation
//! - **error_tests**: Error responses
//!
//! Individual test modules can be run with:
//! ```bash
//! cargo test api_tests
//! ```

pub mod error_tests;
