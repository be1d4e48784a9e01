//! Shared application state (§4.7): threaded through every handler via
//! axum's `FromRef` so each middleware/handler only extracts the piece
//! of state it actually needs.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use buildforge_core::Runtime;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::ratelimit::RateLimitConfig;

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub metrics_handle: PrometheusHandle,
    pub start_time: Instant,
    pub rate_limit: RateLimitConfig,
}

impl AppState {
    pub fn new(runtime: Arc<Runtime>, rate_limit: RateLimitConfig) -> Self {
        Self {
            runtime,
            metrics_handle: setup_metrics(),
            start_time: Instant::now(),
            rate_limit,
        }
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const EXPONENTIAL_SECONDS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

fn setup_metrics() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Full("http_request_duration_seconds".to_string()),
                    EXPONENTIAL_SECONDS,
                )
                .expect("valid histogram bucket configuration")
                .install_recorder()
                .expect("install prometheus recorder")
        })
        .clone()
}
