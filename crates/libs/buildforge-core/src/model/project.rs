//! Project entity (§3) and its repository (§6.1).

use crate::error::{Error, Result};
use crate::ids::ProjectId;
use crate::store::Db;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectForCreate {
    pub name: String,
    pub path: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectForUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
}

pub struct ProjectRepo;

impl ProjectRepo {
    pub async fn create(db: &Db, data: ProjectForCreate) -> Result<Project> {
        let now = Utc::now().naive_utc();
        let mut rows = db
            .query(
                "INSERT INTO project (name, path, description, active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)
                 RETURNING id, name, path, description, active, created_at, updated_at",
                libsql::params![
                    data.name,
                    data.path,
                    data.description,
                    now.format("%Y-%m-%d %H:%M:%S").to_string()
                ],
            )
            .await?;
        let row = rows.next().await?.ok_or(Error::NotFound)?;
        Self::from_row(&row)
    }

    pub async fn get_by_id(db: &Db, id: ProjectId) -> Result<Project> {
        let mut rows = db
            .query(
                "SELECT id, name, path, description, active, created_at, updated_at
                 FROM project WHERE id = ?1",
                libsql::params![id.get()],
            )
            .await?;
        let row = rows.next().await?.ok_or(Error::NotFound)?;
        Self::from_row(&row)
    }

    pub async fn get_by_name(db: &Db, name: &str) -> Result<Project> {
        let mut rows = db
            .query(
                "SELECT id, name, path, description, active, created_at, updated_at
                 FROM project WHERE name = ?1",
                libsql::params![name],
            )
            .await?;
        let row = rows.next().await?.ok_or(Error::NotFound)?;
        Self::from_row(&row)
    }

    pub async fn list_active(db: &Db) -> Result<Vec<Project>> {
        let mut rows = db
            .query(
                "SELECT id, name, path, description, active, created_at, updated_at
                 FROM project WHERE active = 1 ORDER BY id",
                (),
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::from_row(&row)?);
        }
        Ok(out)
    }

    pub async fn update(db: &Db, id: ProjectId, patch: ProjectForUpdate) -> Result<Project> {
        let current = Self::get_by_id(db, id).await?;
        let name = patch.name.unwrap_or(current.name);
        let description = patch.description.or(current.description);
        let active = patch.active.unwrap_or(current.active);
        let now = Utc::now().naive_utc();

        db.execute(
            "UPDATE project SET name = ?1, description = ?2, active = ?3, updated_at = ?4 WHERE id = ?5",
            libsql::params![
                name,
                description,
                active as i64,
                now.format("%Y-%m-%d %H:%M:%S").to_string(),
                id.get()
            ],
        )
        .await?;
        Self::get_by_id(db, id).await
    }

    pub async fn soft_delete(db: &Db, id: ProjectId) -> Result<()> {
        db.execute(
            "UPDATE project SET active = 0, updated_at = ?1 WHERE id = ?2",
            libsql::params![
                Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S").to_string(),
                id.get()
            ],
        )
        .await?;
        Ok(())
    }

    fn from_row(row: &libsql::Row) -> Result<Project> {
        let fmt = "%Y-%m-%d %H:%M:%S";
        Ok(Project {
            id: ProjectId(row.get::<i64>(0)?),
            name: row.get::<String>(1)?,
            path: row.get::<String>(2)?,
            description: row.get::<Option<String>>(3)?,
            active: row.get::<i64>(4)? != 0,
            created_at: NaiveDateTime::parse_from_str(&row.get::<String>(5)?, fmt)
                .map_err(|e| Error::InvalidInput(e.to_string()))?,
            updated_at: NaiveDateTime::parse_from_str(&row.get::<String>(6)?, fmt)
                .map_err(|e| Error::InvalidInput(e.to_string()))?,
        })
    }
}
