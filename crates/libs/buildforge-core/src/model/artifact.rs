//! ArtifactDescriptor entity (§3).

use crate::error::{Error, Result};
use crate::ids::TaskId;
use crate::store::Db;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Apk,
    Log,
    Metadata,
}

impl ArtifactKind {
    fn as_db_str(self) -> &'static str {
        match self {
            Self::Apk => "apk",
            Self::Log => "log",
            Self::Metadata => "metadata",
        }
    }

    fn from_db_str(s: &str) -> Result<Self> {
        Ok(match s {
            "apk" => Self::Apk,
            "log" => Self::Log,
            "metadata" => Self::Metadata,
            other => return Err(Error::InvalidInput(format!("unknown artifact kind {other}"))),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub id: i64,
    pub task_id: TaskId,
    pub filename: String,
    pub path: String,
    pub size_bytes: u64,
    pub content_hash: String,
    pub kind: ArtifactKind,
    pub package_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactForCreate {
    pub filename: String,
    pub path: String,
    pub size_bytes: u64,
    pub content_hash: String,
    pub kind: ArtifactKind,
    pub package_info: Option<serde_json::Value>,
}

pub struct ArtifactRepo;

impl ArtifactRepo {
    pub async fn append(db: &Db, task_id: TaskId, data: ArtifactForCreate) -> Result<ArtifactDescriptor> {
        let now = Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut rows = db
            .query(
                "INSERT INTO artifact (task_id, filename, path, size_bytes, content_hash, kind, package_info_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 RETURNING id, task_id, filename, path, size_bytes, content_hash, kind, package_info_json",
                libsql::params![
                    task_id.get(),
                    data.filename,
                    data.path,
                    data.size_bytes as i64,
                    data.content_hash,
                    data.kind.as_db_str(),
                    data.package_info.map(|v| v.to_string()),
                    now,
                ],
            )
            .await?;
        let row = rows.next().await?.ok_or(Error::NotFound)?;
        Self::from_row(&row)
    }

    pub async fn list_by_task(db: &Db, task_id: TaskId) -> Result<Vec<ArtifactDescriptor>> {
        let mut rows = db
            .query(
                "SELECT id, task_id, filename, path, size_bytes, content_hash, kind, package_info_json
                 FROM artifact WHERE task_id = ?1 ORDER BY id",
                libsql::params![task_id.get()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::from_row(&row)?);
        }
        Ok(out)
    }

    fn from_row(row: &libsql::Row) -> Result<ArtifactDescriptor> {
        Ok(ArtifactDescriptor {
            id: row.get::<i64>(0)?,
            task_id: TaskId(row.get::<i64>(1)?),
            filename: row.get::<String>(2)?,
            path: row.get::<String>(3)?,
            size_bytes: row.get::<i64>(4)? as u64,
            content_hash: row.get::<String>(5)?,
            kind: ArtifactKind::from_db_str(&row.get::<String>(6)?)?,
            package_info: row
                .get::<Option<String>>(7)?
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
        })
    }
}
