//! Database connection and inline schema for the persistence repositories (§4.6, §6.1).

use crate::Result;
use libsql::Builder;
use std::path::{Path, PathBuf};

/// Type alias for database connections.
pub type Db = libsql::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS project (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    path TEXT NOT NULL,
    description TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES project(id),
    kind TEXT NOT NULL,
    branch TEXT NOT NULL,
    archive_path TEXT NOT NULL,
    config_json TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT,
    error_kind TEXT,
    result_json TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS artifact (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES task(id),
    filename TEXT NOT NULL,
    path TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    kind TEXT NOT NULL,
    package_info_json TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS git_operation (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES project(id),
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    pre_commit TEXT,
    post_commit TEXT,
    branch TEXT,
    files_affected_json TEXT NOT NULL DEFAULT '[]',
    message TEXT,
    error_message TEXT,
    snapshot_ids_json TEXT NOT NULL DEFAULT '[]',
    started_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS snapshot (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES project(id),
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    source_branch TEXT NOT NULL,
    source_commit TEXT,
    kind TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    producing_operation_id INTEGER REFERENCES git_operation(id)
);

CREATE INDEX IF NOT EXISTS idx_task_project ON task(project_id);
CREATE INDEX IF NOT EXISTS idx_task_status ON task(status);
CREATE INDEX IF NOT EXISTS idx_artifact_task ON artifact(task_id);
CREATE INDEX IF NOT EXISTS idx_git_operation_project ON git_operation(project_id);
CREATE INDEX IF NOT EXISTS idx_snapshot_project ON snapshot(project_id);
";

/// Opens (creating if absent) the SQLite-via-libsql database at `db_path` and
/// applies the inline schema above. Idempotent: `CREATE TABLE IF NOT EXISTS`
/// makes repeated calls safe.
pub async fn new_db_pool(db_path: impl AsRef<Path>) -> Result<Db> {
    let db_path: PathBuf = db_path.as_ref().to_path_buf();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db = Builder::new_local(&db_path).build().await?;
    let conn = db.connect()?;

    // High-concurrency tuning: WAL lets readers proceed during a writer's
    // transaction, and a busy_timeout avoids SQLITE_BUSY under load from the
    // single-writer-connection model the repositories rely on (§4.6).
    conn.execute("PRAGMA journal_mode=WAL;", ()).await?;
    conn.execute("PRAGMA busy_timeout=30000;", ()).await?;
    conn.execute("PRAGMA synchronous=NORMAL;", ()).await?;
    conn.execute("PRAGMA foreign_keys=ON;", ()).await?;

    conn.execute_batch(SCHEMA).await?;

    Ok(conn)
}

/// In-memory database for tests.
pub async fn new_db_pool_in_memory() -> Result<Db> {
    let db = Builder::new_local(":memory:").build().await?;
    let conn = db.connect()?;
    conn.execute("PRAGMA foreign_keys=ON;", ()).await?;
    conn.execute_batch(SCHEMA).await?;
    Ok(conn)
}
