//! Test configuration for the handful of tests that talk HTTP.

/// Configuration for HTTP-facing E2E tests.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Base URL for a running `buildforge-server` instance.
    pub api_url: String,
    /// Timeout for HTTP operations in milliseconds.
    pub timeout_ms: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            api_url: std::env::var("BUILDFORGE_TEST_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8765".to_string()),
            timeout_ms: std::env::var("BUILDFORGE_TEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30_000),
        }
    }
}

impl TestConfig {
    pub fn new() -> Self {
        Self::default()
    }
}
