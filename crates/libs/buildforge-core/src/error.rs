//! Error taxonomy for `buildforge-core`.
//!
//! Errors are categorized into:
//!
//! - **External errors**: wrapped errors from dependencies (libsql, git2, serde_json, io)
//! - **Internal errors**: the closed set of kinds from the error handling design, carried
//!   as a fieldless [`Kind`] alongside the rich [`Error`] variant so a transport layer
//!   can translate stably without matching on payload shape.

use crate::ids::{GitOperationId, ProjectId, SnapshotId, TaskId};
use strum_macros::AsRefStr;
use thiserror::Error;

/// The closed set of error kinds from the error handling design. Stable
/// across releases; the sole thing an HTTP boundary should switch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum Kind {
    ProjectMissing,
    NotARepository,
    DetachedHead,
    WorkingTreeDirty,
    StaleLock,
    LockTimeout,
    ResourcePackageMismatch,
    ExtractorFailure,
    GradleExitNonZero,
    Timeout,
    Cancelled,
    NoArtifacts,
    Abandoned,
    SnapshotMissing,
    RestoreFailed,
}

#[derive(Debug, Error, AsRefStr)]
pub enum Error {
    // -- External errors from dependencies
    #[error("Libsql error: {0}")]
    Libsql(#[from] libsql::Error),

    #[error("Git error: {0}")]
    Git2(#[from] git2::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -- Internal errors, §7
    #[error("Project path missing or not a directory: {0}")]
    ProjectMissing(ProjectId),

    #[error("Git required but {0} is not a repository")]
    NotARepository(ProjectId),

    #[error("HEAD is detached for project {0}")]
    DetachedHead(ProjectId),

    #[error("Working tree for project {0} has uncommitted changes")]
    WorkingTreeDirty(ProjectId),

    #[error("Stale lock at {path}")]
    StaleLock { path: String },

    #[error("Repo Guard timed out waiting for project {project_id} after {waited_ms}ms")]
    LockTimeout { project_id: ProjectId, waited_ms: u64 },

    #[error(
        "archive top-level directory '{archive_name}' has no match under apps/ (candidates: {candidates:?})"
    )]
    ResourcePackageMismatch {
        archive_name: String,
        candidates: Vec<String>,
    },

    #[error("archive extraction failed: {0}")]
    ExtractorFailure(String),

    #[error("gradle exited with code {0}")]
    GradleExitNonZero(i32),

    #[error("task {0} exceeded its deadline")]
    Timeout(TaskId),

    #[error("task {0} was cancelled")]
    Cancelled(TaskId),

    #[error("gradle succeeded but produced no APK artifacts for task {0}")]
    NoArtifacts(TaskId),

    #[error("task {0} was running when the process restarted")]
    Abandoned(TaskId),

    #[error("snapshot {0} not found")]
    SnapshotMissing(SnapshotId),

    #[error("restore of snapshot {0} failed: {reason}")]
    RestoreFailed { snapshot: SnapshotId, reason: String },

    #[error("git operation {0} failed: {1}")]
    GitOperationFailed(GitOperationId, String),

    #[error("entity not found")]
    NotFound,

    #[error("conflicting state: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Kind {
    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "project_missing" => Self::ProjectMissing,
            "not_a_repository" => Self::NotARepository,
            "detached_head" => Self::DetachedHead,
            "working_tree_dirty" => Self::WorkingTreeDirty,
            "stale_lock" => Self::StaleLock,
            "lock_timeout" => Self::LockTimeout,
            "resource_package_mismatch" => Self::ResourcePackageMismatch,
            "extractor_failure" => Self::ExtractorFailure,
            "gradle_exit_non_zero" => Self::GradleExitNonZero,
            "timeout" => Self::Timeout,
            "cancelled" => Self::Cancelled,
            "no_artifacts" => Self::NoArtifacts,
            "abandoned" => Self::Abandoned,
            "snapshot_missing" => Self::SnapshotMissing,
            "restore_failed" => Self::RestoreFailed,
            _ => return None,
        })
    }
}

impl Error {
    /// Stable kind for transport-layer translation; `None` for errors that
    /// never cross the core/transport boundary as a first-class kind
    /// (wrapped external errors, generic not-found/conflict/unavailable).
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Error::ProjectMissing(_) => Some(Kind::ProjectMissing),
            Error::NotARepository(_) => Some(Kind::NotARepository),
            Error::DetachedHead(_) => Some(Kind::DetachedHead),
            Error::WorkingTreeDirty(_) => Some(Kind::WorkingTreeDirty),
            Error::StaleLock { .. } => Some(Kind::StaleLock),
            Error::LockTimeout { .. } => Some(Kind::LockTimeout),
            Error::ResourcePackageMismatch { .. } => Some(Kind::ResourcePackageMismatch),
            Error::ExtractorFailure(_) => Some(Kind::ExtractorFailure),
            Error::GradleExitNonZero(_) => Some(Kind::GradleExitNonZero),
            Error::Timeout(_) => Some(Kind::Timeout),
            Error::Cancelled(_) => Some(Kind::Cancelled),
            Error::NoArtifacts(_) => Some(Kind::NoArtifacts),
            Error::Abandoned(_) => Some(Kind::Abandoned),
            Error::SnapshotMissing(_) => Some(Kind::SnapshotMissing),
            Error::RestoreFailed { .. } => Some(Kind::RestoreFailed),
            _ => None,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
