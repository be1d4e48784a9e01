//! Liveness, readiness, and Prometheus scrape endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy",
        uptime_seconds: state.start_time.elapsed().as_secs(),
    };
    (StatusCode::OK, Json(response))
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    database: &'static str,
}

pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.runtime.db.query("SELECT 1", ()).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };
    let is_ready = database == "connected";

    let response = ReadyResponse {
        status: if is_ready { "ready" } else { "not_ready" },
        database,
    };
    let status = if is_ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(response))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}
