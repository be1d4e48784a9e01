//! Authentication middleware slot (§4.7, §9).
//!
//! Single-tenant deployments run with no authentication. The middleware
//! stays wired into the same `route_layer` position reserved for a real
//! auth layer, so adding one later is a drop-in rather than a router
//! reshuffle.

use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;

pub async fn auth_middleware(State(_state): State<AppState>, req: Request<axum::body::Body>, next: Next) -> Response {
    next.run(req).await
}
