//! Snapshot entity (§3): a record of repository state captured before a
//! mutating Git operation, used for recovery (§4.2.1, §4.2.3).

use crate::error::{Error, Result};
use crate::ids::{GitOperationId, ProjectId, SnapshotId};
use crate::store::Db;
use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// Tarball of the working tree and `.git`.
    Full,
    /// HEAD commit, current branch, and the diff/stash of uncommitted changes.
    Snapshot,
}

impl SnapshotKind {
    fn as_db_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Snapshot => "snapshot",
        }
    }

    fn from_db_str(s: &str) -> Result<Self> {
        Ok(match s {
            "full" => Self::Full,
            "snapshot" => Self::Snapshot,
            other => return Err(Error::InvalidInput(format!("unknown snapshot kind {other}"))),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub project_id: ProjectId,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub source_branch: String,
    pub source_commit: Option<String>,
    pub kind: SnapshotKind,
    pub storage_path: String,
    pub active: bool,
    pub producing_operation_id: Option<GitOperationId>,
}

#[derive(Debug, Clone)]
pub struct SnapshotForCreate {
    pub project_id: ProjectId,
    pub ttl: Duration,
    pub source_branch: String,
    pub source_commit: Option<String>,
    pub kind: SnapshotKind,
    pub storage_path: String,
    pub producing_operation_id: Option<GitOperationId>,
}

pub struct SnapshotRepo;

const FMT: &str = "%Y-%m-%d %H:%M:%S";

impl SnapshotRepo {
    pub async fn create(db: &Db, data: SnapshotForCreate) -> Result<Snapshot> {
        let now = Utc::now().naive_utc();
        let expires = now + data.ttl;
        let mut rows = db
            .query(
                "INSERT INTO snapshot (project_id, created_at, expires_at, source_branch, source_commit,
                        kind, storage_path, active, producing_operation_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)
                 RETURNING id, project_id, created_at, expires_at, source_branch, source_commit,
                           kind, storage_path, active, producing_operation_id",
                libsql::params![
                    data.project_id.get(),
                    now.format(FMT).to_string(),
                    expires.format(FMT).to_string(),
                    data.source_branch,
                    data.source_commit,
                    data.kind.as_db_str(),
                    data.storage_path,
                    data.producing_operation_id.map(|o| o.get()),
                ],
            )
            .await?;
        let row = rows.next().await?.ok_or(Error::NotFound)?;
        Self::from_row(&row)
    }

    pub async fn get_by_id(db: &Db, id: SnapshotId) -> Result<Snapshot> {
        let mut rows = db
            .query(
                "SELECT id, project_id, created_at, expires_at, source_branch, source_commit,
                        kind, storage_path, active, producing_operation_id
                 FROM snapshot WHERE id = ?1",
                libsql::params![id.get()],
            )
            .await?;
        let row = rows.next().await?.ok_or(Error::SnapshotMissing(id))?;
        Self::from_row(&row)
    }

    pub async fn list_active_by_project(db: &Db, project_id: ProjectId) -> Result<Vec<Snapshot>> {
        let mut rows = db
            .query(
                "SELECT id, project_id, created_at, expires_at, source_branch, source_commit,
                        kind, storage_path, active, producing_operation_id
                 FROM snapshot WHERE project_id = ?1 AND active = 1 ORDER BY id DESC",
                libsql::params![project_id.get()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::from_row(&row)?);
        }
        Ok(out)
    }

    pub async fn mark_inactive(db: &Db, id: SnapshotId) -> Result<()> {
        db.execute(
            "UPDATE snapshot SET active = 0 WHERE id = ?1",
            libsql::params![id.get()],
        )
        .await?;
        Ok(())
    }

    /// Returns expired, still-active snapshots; caller removes the on-disk
    /// artifact then calls [`Self::mark_inactive`] (invariant 6, §3).
    pub async fn delete_expired(db: &Db) -> Result<Vec<Snapshot>> {
        let now = Utc::now().naive_utc().format(FMT).to_string();
        let mut rows = db
            .query(
                "SELECT id, project_id, created_at, expires_at, source_branch, source_commit,
                        kind, storage_path, active, producing_operation_id
                 FROM snapshot WHERE active = 1 AND expires_at < ?1",
                libsql::params![now],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::from_row(&row)?);
        }
        Ok(out)
    }

    /// Removes every expired, still-active snapshot's on-disk storage and
    /// marks it inactive (invariant 6, §3). Returns the number cleaned up.
    pub async fn collect_garbage(db: &Db) -> Result<u64> {
        let expired = Self::delete_expired(db).await?;
        let mut cleaned = 0u64;
        for snapshot in expired {
            if snapshot.kind == SnapshotKind::Full {
                let path = std::path::Path::new(&snapshot.storage_path);
                if path.exists() {
                    if let Err(e) = std::fs::remove_file(path) {
                        tracing::warn!(snapshot_id = %snapshot.id, error = %e, "failed to remove expired snapshot storage");
                        continue;
                    }
                }
            }
            Self::mark_inactive(db, snapshot.id).await?;
            cleaned += 1;
        }
        Ok(cleaned)
    }

    fn from_row(row: &libsql::Row) -> Result<Snapshot> {
        let parse_ts = |s: String| {
            NaiveDateTime::parse_from_str(&s, FMT).map_err(|e| Error::InvalidInput(e.to_string()))
        };
        Ok(Snapshot {
            id: SnapshotId(row.get::<i64>(0)?),
            project_id: ProjectId(row.get::<i64>(1)?),
            created_at: parse_ts(row.get::<String>(2)?)?,
            expires_at: parse_ts(row.get::<String>(3)?)?,
            source_branch: row.get::<String>(4)?,
            source_commit: row.get::<Option<String>>(5)?,
            kind: SnapshotKind::from_db_str(&row.get::<String>(6)?)?,
            storage_path: row.get::<String>(7)?,
            active: row.get::<i64>(8)? != 0,
            producing_operation_id: row.get::<Option<i64>>(9)?.map(GitOperationId),
        })
    }
}
