//! Repo Guard (C1): serializes concurrent access to a project's working
//! directory and validates its repository invariants before any caller is
//! allowed to touch it (§4.1).

use crate::error::{Error, Result};
use crate::ids::ProjectId;
use git2::Repository;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Per-project exclusive lease registry. Leases are created lazily and never
/// removed, so the map grows with the number of distinct projects ever seen
/// but never needs cross-project coordination.
pub struct RepoGuard {
    leases: Mutex<HashMap<ProjectId, Arc<Mutex<()>>>>,
    stale_lock_max_age: Duration,
    acquire_timeout: Duration,
}

impl RepoGuard {
    pub fn new(stale_lock_max_age_secs: u64, acquire_timeout_secs: u64) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            stale_lock_max_age: Duration::from_secs(stale_lock_max_age_secs),
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
        }
    }

    async fn lease_for(&self, project_id: ProjectId) -> Arc<Mutex<()>> {
        let mut leases = self.leases.lock().await;
        Arc::clone(
            leases
                .entry(project_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Acquires the project's exclusive lease, runs the pre-entry checks
    /// (§4.1), then runs `f`. The lease is released on every exit path,
    /// including a panic inside `f` — `f` runs on its own task so a panic
    /// surfaces as an error instead of poisoning the lease.
    pub async fn with_project<F, Fut, T>(
        &self,
        project_id: ProjectId,
        path: &Path,
        requires_git: bool,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let lease = self.lease_for(project_id).await;
        let started = Instant::now();
        let _permit = tokio::time::timeout(self.acquire_timeout, lease.lock())
            .await
            .map_err(|_| Error::LockTimeout {
                project_id,
                waited_ms: started.elapsed().as_millis() as u64,
            })?;

        self.pre_entry_checks(project_id, path, requires_git).await?;

        match tokio::spawn(f()).await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => Err(Error::Conflict(format!(
                "operation on project {project_id} panicked: {join_err}"
            ))),
            Err(join_err) => Err(Error::Conflict(format!(
                "operation on project {project_id} was aborted: {join_err}"
            ))),
        }
    }

    /// §4.1 pre-entry checks table, run with the lease already held.
    async fn pre_entry_checks(&self, project_id: ProjectId, path: &Path, requires_git: bool) -> Result<()> {
        if !path.is_dir() {
            return Err(Error::ProjectMissing(project_id));
        }

        let git_dir = path.join(".git");
        if requires_git && !git_dir.exists() {
            return Err(Error::NotARepository(project_id));
        }

        if git_dir.exists() {
            self.clear_stale_index_lock(project_id, &git_dir).await?;

            if requires_git {
                let repo = Repository::open(path)?;
                if repo.head_detached().unwrap_or(false) {
                    return Err(Error::DetachedHead(project_id));
                }
            }
        }

        Ok(())
    }

    /// `.git/index.lock` and `.git/HEAD.lock` carry no owner metadata (git
    /// itself never writes any), so staleness can only be judged by mtime
    /// age against `stale_lock_max_age_secs`.
    async fn clear_stale_index_lock(&self, project_id: ProjectId, git_dir: &Path) -> Result<()> {
        for name in ["index.lock", "HEAD.lock"] {
            let lock_path: PathBuf = git_dir.join(name);
            let Ok(meta) = tokio::fs::metadata(&lock_path).await else {
                continue;
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .unwrap_or(Duration::ZERO);

            if age > self.stale_lock_max_age {
                warn!(path = %lock_path.display(), age_secs = age.as_secs(), "clearing stale git lock");
                tokio::fs::remove_file(&lock_path).await?;
            } else {
                debug!(path = %lock_path.display(), age_secs = age.as_secs(), "git lock held and not stale");
                return Err(Error::StaleLock {
                    path: lock_path.display().to_string(),
                });
            }
        }
        let _ = project_id;
        Ok(())
    }
}
