//! Task entity (§3) and its canonical state machine (§4.4.1).

use crate::error::{Error, Kind, Result};
use crate::ids::{ProjectId, TaskId};
use crate::store::Db;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Build,
}

/// `pending → running → {completed | failed | cancelled}` (§4.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Validates the single allowed transition path per §4.4.1: only one
    /// path per task, `cancelled` reachable from `pending` or `running`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    fn as_db_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    fn from_db_str(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            other => return Err(Error::InvalidInput(format!("unknown task status {other}"))),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub kind: TaskKind,
    pub branch: String,
    pub archive_path: String,
    pub config: serde_json::Value,
    pub status: TaskStatus,
    pub progress: u8,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
    pub error_kind: Option<Kind>,
    pub result: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskForCreate {
    pub project_id: ProjectId,
    pub branch: String,
    pub archive_path: String,
    pub config: serde_json::Value,
}

/// Fields that `updateStatus` may carry alongside the new status (§6.1).
#[derive(Debug, Clone, Default)]
pub struct TaskStatusFields {
    pub progress: Option<u8>,
    pub error_message: Option<String>,
    pub error_kind: Option<Kind>,
    pub result: Option<serde_json::Value>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

pub struct TaskRepo;

const FMT: &str = "%Y-%m-%d %H:%M:%S";

impl TaskRepo {
    pub async fn create(db: &Db, data: TaskForCreate) -> Result<Task> {
        let now = Utc::now().naive_utc();
        let mut rows = db
            .query(
                "INSERT INTO task (project_id, kind, branch, archive_path, config_json, status, progress, created_at, updated_at)
                 VALUES (?1, 'build', ?2, ?3, ?4, 'pending', 0, ?5, ?5)
                 RETURNING id, project_id, kind, branch, archive_path, config_json, status, progress,
                           started_at, completed_at, error_message, error_kind, result_json, created_at, updated_at",
                libsql::params![
                    data.project_id.get(),
                    data.branch,
                    data.archive_path,
                    data.config.to_string(),
                    now.format(FMT).to_string(),
                ],
            )
            .await?;
        let row = rows.next().await?.ok_or(Error::NotFound)?;
        Self::from_row(&row)
    }

    pub async fn get_by_id(db: &Db, id: TaskId) -> Result<Task> {
        let mut rows = db
            .query(
                "SELECT id, project_id, kind, branch, archive_path, config_json, status, progress,
                        started_at, completed_at, error_message, error_kind, result_json, created_at, updated_at
                 FROM task WHERE id = ?1",
                libsql::params![id.get()],
            )
            .await?;
        let row = rows.next().await?.ok_or(Error::NotFound)?;
        Self::from_row(&row)
    }

    pub async fn list_by_project(db: &Db, project_id: ProjectId) -> Result<Vec<Task>> {
        let mut rows = db
            .query(
                "SELECT id, project_id, kind, branch, archive_path, config_json, status, progress,
                        started_at, completed_at, error_message, error_kind, result_json, created_at, updated_at
                 FROM task WHERE project_id = ?1 ORDER BY id DESC",
                libsql::params![project_id.get()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::from_row(&row)?);
        }
        Ok(out)
    }

    /// Returns the project's single non-terminal task, if any (invariant 1, §3).
    pub async fn active_for_project(db: &Db, project_id: ProjectId) -> Result<Option<Task>> {
        let mut rows = db
            .query(
                "SELECT id, project_id, kind, branch, archive_path, config_json, status, progress,
                        started_at, completed_at, error_message, error_kind, result_json, created_at, updated_at
                 FROM task WHERE project_id = ?1 AND status IN ('pending', 'running') LIMIT 1",
                libsql::params![project_id.get()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn update_status(
        db: &Db,
        id: TaskId,
        status: TaskStatus,
        fields: TaskStatusFields,
    ) -> Result<Task> {
        let now = Utc::now().naive_utc();
        let current = Self::get_by_id(db, id).await?;
        if !current.status.can_transition_to(status) && current.status != status {
            return Err(Error::Conflict(format!(
                "task {id} cannot transition {:?} -> {:?}",
                current.status, status
            )));
        }
        let progress = fields.progress.unwrap_or(current.progress);
        let started_at = fields
            .started_at
            .map(|t| t.format(FMT).to_string())
            .or(current.started_at.map(|t| t.format(FMT).to_string()));
        let completed_at = fields
            .completed_at
            .map(|t| t.format(FMT).to_string())
            .or(current.completed_at.map(|t| t.format(FMT).to_string()));

        db.execute(
            "UPDATE task SET status = ?1, progress = ?2, started_at = ?3, completed_at = ?4,
                    error_message = ?5, error_kind = ?6, result_json = ?7, updated_at = ?8
             WHERE id = ?9",
            libsql::params![
                status.as_db_str(),
                progress as i64,
                started_at,
                completed_at,
                fields.error_message,
                fields.error_kind.map(|k| k.as_ref().to_string()),
                fields.result.map(|v| v.to_string()),
                now.format(FMT).to_string(),
                id.get(),
            ],
        )
        .await?;
        Self::get_by_id(db, id).await
    }

    /// Marks every task left `running` or `pending` at process start as
    /// `failed` with kind `Abandoned` (§4.4.4, invariant "Abandoned").
    pub async fn abandon_non_terminal(db: &Db) -> Result<u64> {
        let now = Utc::now().naive_utc().format(FMT).to_string();
        let changed = db
            .execute(
                "UPDATE task SET status = 'failed', error_kind = 'abandoned',
                        error_message = 'task was running when the process restarted', updated_at = ?1
                 WHERE status IN ('pending', 'running')",
                libsql::params![now],
            )
            .await?;
        Ok(changed)
    }

    fn from_row(row: &libsql::Row) -> Result<Task> {
        let parse_ts = |s: String| {
            NaiveDateTime::parse_from_str(&s, FMT).map_err(|e| Error::InvalidInput(e.to_string()))
        };
        Ok(Task {
            id: TaskId(row.get::<i64>(0)?),
            project_id: ProjectId(row.get::<i64>(1)?),
            kind: TaskKind::Build,
            branch: row.get::<String>(3)?,
            archive_path: row.get::<String>(4)?,
            config: serde_json::from_str(&row.get::<String>(5)?)?,
            status: TaskStatus::from_db_str(&row.get::<String>(6)?)?,
            progress: row.get::<i64>(7)? as u8,
            started_at: row.get::<Option<String>>(8)?.map(parse_ts).transpose()?,
            completed_at: row.get::<Option<String>>(9)?.map(parse_ts).transpose()?,
            error_message: row.get::<Option<String>>(10)?,
            error_kind: row
                .get::<Option<String>>(11)?
                .and_then(|s| Kind::from_db_str(&s)),
            result: row
                .get::<Option<String>>(12)?
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            created_at: parse_ts(row.get::<String>(13)?)?,
            updated_at: parse_ts(row.get::<String>(14)?)?,
        })
    }
}
