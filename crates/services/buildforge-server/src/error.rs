//! HTTP error translation (§7, §9): the transport shell is the only place
//! a `buildforge_core::error::Kind` is mapped to an HTTP status code. The
//! core's error taxonomy stays stable; only this boundary knows about
//! status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use buildforge_core::error::{Error as CoreError, Kind};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub error: String,
}

impl ErrorResponse {
    fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            error: error.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{0}")]
    BadRequest(String),
}

fn kind_to_status(kind: Kind) -> StatusCode {
    match kind {
        Kind::ProjectMissing | Kind::NotARepository | Kind::SnapshotMissing => StatusCode::NOT_FOUND,
        Kind::DetachedHead
        | Kind::WorkingTreeDirty
        | Kind::ResourcePackageMismatch
        | Kind::ExtractorFailure
        | Kind::GradleExitNonZero
        | Kind::NoArtifacts => StatusCode::UNPROCESSABLE_ENTITY,
        Kind::StaleLock | Kind::LockTimeout | Kind::Timeout | Kind::Cancelled => StatusCode::CONFLICT,
        Kind::Abandoned => StatusCode::GONE,
        Kind::RestoreFailed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "request failed");

        let (status, body) = match &self {
            ServerError::Core(err) => match err.kind() {
                Some(kind) => (
                    kind_to_status(kind),
                    ErrorResponse::new(kind.as_ref().to_string(), err.to_string()),
                ),
                None => match err {
                    CoreError::NotFound => {
                        (StatusCode::NOT_FOUND, ErrorResponse::new("not_found", "resource not found"))
                    }
                    CoreError::Conflict(msg) => (StatusCode::CONFLICT, ErrorResponse::new("conflict", msg.clone())),
                    CoreError::InvalidInput(msg) => {
                        (StatusCode::BAD_REQUEST, ErrorResponse::new("invalid_input", msg.clone()))
                    }
                    CoreError::Unavailable(msg) => {
                        (StatusCode::SERVICE_UNAVAILABLE, ErrorResponse::new("unavailable", msg.clone()))
                    }
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::new("internal_error", "an internal error occurred"),
                    ),
                },
            },
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new("bad_request", msg.clone())),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
