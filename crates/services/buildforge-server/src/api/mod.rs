//! HTTP/SSE surface (§6.4, §4.7): task lifecycle, log streaming, project
//! registration, and direct Git operations.

pub mod git;
pub mod health;
pub mod logs;
pub mod projects;
pub mod tasks;

use axum::http::header::{HeaderName, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::ratelimit::rate_limit_middleware;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/projects", post(projects::create).get(projects::list))
        .route("/tasks", post(tasks::create))
        .route("/tasks/{id}", get(tasks::get))
        .route("/tasks/{id}/start", post(tasks::start))
        .route("/tasks/{id}/cancel", post(tasks::cancel))
        .route("/tasks/{id}/logs/stream", get(logs::stream))
        .route("/projects/{id}/git/commit", post(git::commit))
        .route("/projects/{id}/git/rollback", post(git::rollback))
        .route("/projects/{id}/git/restore", post(git::restore))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(health::metrics))
        .route("/healthz", get(health::health))
        .layer(TraceLayer::new_for_http())
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("content-security-policy"),
            HeaderValue::from_static("default-src 'none'"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}
