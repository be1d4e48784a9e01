//! GitOperation entity and its `pending → in_progress → {completed | failed | cancelled}`
//! state machine (§3, §4.2.2).

use crate::error::{Error, Result};
use crate::ids::{GitOperationId, ProjectId, SnapshotId};
use crate::store::Db;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitOperationKind {
    Commit,
    Rollback,
    BranchSwitch,
    BranchCreate,
    Backup,
    Restore,
}

impl GitOperationKind {
    fn as_db_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::BranchSwitch => "branch_switch",
            Self::BranchCreate => "branch_create",
            Self::Backup => "backup",
            Self::Restore => "restore",
        }
    }

    fn from_db_str(s: &str) -> Result<Self> {
        Ok(match s {
            "commit" => Self::Commit,
            "rollback" => Self::Rollback,
            "branch_switch" => Self::BranchSwitch,
            "branch_create" => Self::BranchCreate,
            "backup" => Self::Backup,
            "restore" => Self::Restore,
            other => return Err(Error::InvalidInput(format!("unknown git operation kind {other}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitOperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl GitOperationStatus {
    /// §4.2.2: transitions only while the lease is held; `cancelled` is
    /// reachable from `pending` only, `in_progress` always runs to a
    /// terminal non-cancelled state.
    pub fn can_transition_to(self, next: Self) -> bool {
        use GitOperationStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress) | (Pending, Cancelled) | (InProgress, Completed) | (InProgress, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn as_db_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    fn from_db_str(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            other => return Err(Error::InvalidInput(format!("unknown git operation status {other}"))),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitOperation {
    pub id: GitOperationId,
    pub project_id: ProjectId,
    pub kind: GitOperationKind,
    pub status: GitOperationStatus,
    pub pre_commit: Option<String>,
    pub post_commit: Option<String>,
    pub branch: Option<String>,
    pub files_affected: Vec<String>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub snapshot_ids: Vec<SnapshotId>,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitOperationForCreate {
    pub project_id: ProjectId,
    pub kind: GitOperationKind,
    pub branch: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GitOperationUpdate {
    pub pre_commit: Option<String>,
    pub post_commit: Option<String>,
    pub files_affected: Option<Vec<String>>,
    pub error: Option<String>,
    pub snapshot_ids: Option<Vec<SnapshotId>>,
    pub completed_at: Option<NaiveDateTime>,
}

pub struct GitOperationRepo;

const FMT: &str = "%Y-%m-%d %H:%M:%S";

impl GitOperationRepo {
    pub async fn create(db: &Db, data: GitOperationForCreate) -> Result<GitOperation> {
        let now = Utc::now().naive_utc();
        let mut rows = db
            .query(
                "INSERT INTO git_operation (project_id, kind, status, branch, message, started_at)
                 VALUES (?1, ?2, 'pending', ?3, ?4, ?5)
                 RETURNING id, project_id, kind, status, pre_commit, post_commit, branch,
                           files_affected_json, message, error_message, snapshot_ids_json, started_at, completed_at",
                libsql::params![
                    data.project_id.get(),
                    data.kind.as_db_str(),
                    data.branch,
                    data.message,
                    now.format(FMT).to_string(),
                ],
            )
            .await?;
        let row = rows.next().await?.ok_or(Error::NotFound)?;
        Self::from_row(&row)
    }

    pub async fn update_status(
        db: &Db,
        id: GitOperationId,
        status: GitOperationStatus,
        patch: GitOperationUpdate,
    ) -> Result<GitOperation> {
        let current = Self::get_by_id(db, id).await?;
        if !current.status.can_transition_to(status) && current.status != status {
            return Err(Error::Conflict(format!(
                "git operation {id} cannot transition {:?} -> {:?}",
                current.status, status
            )));
        }
        let files = patch.files_affected.unwrap_or(current.files_affected);
        let snapshots = patch.snapshot_ids.unwrap_or(current.snapshot_ids);
        let completed_at = patch
            .completed_at
            .map(|t| t.format(FMT).to_string())
            .or(current.completed_at.map(|t| t.format(FMT).to_string()));

        db.execute(
            "UPDATE git_operation SET status = ?1, pre_commit = ?2, post_commit = ?3,
                    files_affected_json = ?4, error_message = ?5, snapshot_ids_json = ?6, completed_at = ?7
             WHERE id = ?8",
            libsql::params![
                status.as_db_str(),
                patch.pre_commit.or(current.pre_commit),
                patch.post_commit.or(current.post_commit),
                serde_json::to_string(&files)?,
                patch.error.or(current.error),
                serde_json::to_string(&snapshots.iter().map(|s| s.get()).collect::<Vec<_>>())?,
                completed_at,
                id.get(),
            ],
        )
        .await?;
        Self::get_by_id(db, id).await
    }

    pub async fn get_by_id(db: &Db, id: GitOperationId) -> Result<GitOperation> {
        let mut rows = db
            .query(
                "SELECT id, project_id, kind, status, pre_commit, post_commit, branch,
                        files_affected_json, message, error_message, snapshot_ids_json, started_at, completed_at
                 FROM git_operation WHERE id = ?1",
                libsql::params![id.get()],
            )
            .await?;
        let row = rows.next().await?.ok_or(Error::NotFound)?;
        Self::from_row(&row)
    }

    pub async fn list_by_project(db: &Db, project_id: ProjectId) -> Result<Vec<GitOperation>> {
        let mut rows = db
            .query(
                "SELECT id, project_id, kind, status, pre_commit, post_commit, branch,
                        files_affected_json, message, error_message, snapshot_ids_json, started_at, completed_at
                 FROM git_operation WHERE project_id = ?1 ORDER BY id DESC",
                libsql::params![project_id.get()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::from_row(&row)?);
        }
        Ok(out)
    }

    fn from_row(row: &libsql::Row) -> Result<GitOperation> {
        let parse_ts = |s: String| {
            NaiveDateTime::parse_from_str(&s, FMT).map_err(|e| Error::InvalidInput(e.to_string()))
        };
        let snapshot_ids: Vec<i64> = serde_json::from_str(&row.get::<String>(10)?)?;
        Ok(GitOperation {
            id: GitOperationId(row.get::<i64>(0)?),
            project_id: ProjectId(row.get::<i64>(1)?),
            kind: GitOperationKind::from_db_str(&row.get::<String>(2)?)?,
            status: GitOperationStatus::from_db_str(&row.get::<String>(3)?)?,
            pre_commit: row.get::<Option<String>>(4)?,
            post_commit: row.get::<Option<String>>(5)?,
            branch: row.get::<Option<String>>(6)?,
            files_affected: serde_json::from_str(&row.get::<String>(7)?)?,
            message: row.get::<Option<String>>(8)?,
            error: row.get::<Option<String>>(9)?,
            snapshot_ids: snapshot_ids.into_iter().map(SnapshotId).collect(),
            started_at: parse_ts(row.get::<String>(11)?)?,
            completed_at: row.get::<Option<String>>(12)?.map(parse_ts).transpose()?,
        })
    }
}
