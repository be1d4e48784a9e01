//! End-to-end test utilities for the build orchestration server: a thin
//! `reqwest`-based client plus a `TestConfig` pointed at a
//! separately-started `buildforge-server` instance, for the handful of
//! tests that exercise the HTTP surface rather than the core directly.

pub mod config;
pub mod fixtures;

pub use config::TestConfig;
pub use fixtures::TestFixtures;
