//! Git Safety Layer (C2): the six mutating operations of §4.2.1, each
//! wrapped in a [`crate::model::git_operation::GitOperation`] record and
//! driven through the `pending -> in_progress -> {completed|failed|cancelled}`
//! state machine.

use crate::error::{Error, Result};
use crate::ids::{ProjectId, SnapshotId};
use crate::model::git_operation::{
    GitOperationForCreate, GitOperationKind, GitOperationRepo, GitOperationStatus, GitOperationUpdate,
};
use crate::model::snapshot::{SnapshotForCreate, SnapshotKind, SnapshotRepo};
use crate::store::repo_cache::RepoCache;
use crate::store::Db;
use chrono::Duration as ChronoDuration;
use git2::{ErrorCode, ObjectType, Repository, Signature};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const COMMIT_AUTHOR_NAME: &str = "buildforge";
const COMMIT_AUTHOR_EMAIL: &str = "buildforge@localhost";

pub struct GitSafety {
    repos: RepoCache,
    /// Serializes index mutation across all projects: git2's index/working
    /// tree operations are not safe to interleave even across distinct
    /// `Repository` handles on the same checkout.
    git_lock: Arc<Mutex<()>>,
}

impl GitSafety {
    pub fn new(repo_cache_size: usize) -> Self {
        Self {
            repos: RepoCache::new(repo_cache_size),
            git_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Captures the project's current state before a mutating operation
    /// (§4.2.1). `Snapshot::Full` zips the whole working tree plus `.git`,
    /// so restoring it can undo history as well as file contents;
    /// `Snapshot::Snapshot` records only the HEAD commit and branch, which
    /// is cheap but can only restore committed state.
    pub async fn snapshot(
        &self,
        db: &Db,
        project_id: ProjectId,
        repo_path: &Path,
        kind: SnapshotKind,
        ttl_days: i64,
        producing_operation_id: Option<crate::ids::GitOperationId>,
    ) -> Result<crate::model::snapshot::Snapshot> {
        let _lock = self.git_lock.lock().await;
        let handle = self.repos.get(repo_path).await?;
        let repo = handle.lock().await;

        let (branch, commit) = current_branch_and_commit(&repo)?;

        let storage_path = match kind {
            SnapshotKind::Snapshot => format!("ref:{branch}@{}", commit.clone().unwrap_or_default()),
            SnapshotKind::Full => {
                let snapshots_dir = snapshots_dir(repo_path);
                std::fs::create_dir_all(&snapshots_dir)?;
                let file_name = format!("{}-full.zip", chrono::Utc::now().timestamp_millis());
                let dest = snapshots_dir.join(&file_name);
                zip_directory(repo_path, &dest)?;
                dest.display().to_string()
            }
        };
        drop(repo);

        SnapshotRepo::create(
            db,
            SnapshotForCreate {
                project_id,
                ttl: ChronoDuration::days(ttl_days),
                source_branch: branch,
                source_commit: commit,
                kind,
                storage_path,
                producing_operation_id,
            },
        )
        .await
    }

    /// Convenience wrapper that records its own `backup`-kind
    /// [`crate::model::git_operation::GitOperation`] around the snapshot
    /// capture, for callers (e.g. the standalone `Snapshot` operation of
    /// §4.2.1) that aren't already inside one.
    pub async fn snapshot_as_operation(
        &self,
        db: &Db,
        project_id: ProjectId,
        repo_path: &Path,
        kind: SnapshotKind,
        ttl_days: i64,
    ) -> Result<crate::model::snapshot::Snapshot> {
        let op = self.begin(db, project_id, GitOperationKind::Backup, None, None).await?;
        let result = self.snapshot(db, project_id, repo_path, kind, ttl_days, Some(op.id)).await;
        self.finish(db, op.id, result.as_ref().err()).await?;
        result
    }

    /// Switches to `branch`, creating it from the current HEAD when
    /// `create_if_missing` is set and it does not already exist (§4.2.1).
    /// A no-op if `branch` is already checked out: nothing is recorded.
    pub async fn checkout_branch(
        &self,
        db: &Db,
        project_id: ProjectId,
        repo_path: &Path,
        branch: &str,
        create_if_missing: bool,
    ) -> Result<()> {
        if self.current_branch_is(repo_path, branch).await? {
            return Ok(());
        }

        let op = self.begin(db, project_id, GitOperationKind::BranchSwitch, Some(branch.to_string()), None).await?;
        let result = self.checkout_branch_inner(project_id, repo_path, branch, create_if_missing).await;
        self.finish(db, op.id, result.as_ref().err()).await?;
        result
    }

    async fn current_branch_is(&self, repo_path: &Path, branch: &str) -> Result<bool> {
        let _lock = self.git_lock.lock().await;
        let handle = self.repos.get(repo_path).await?;
        let repo = handle.lock().await;
        match repo.head() {
            Ok(head) => Ok(head.is_branch() && head.shorthand() == Some(branch)),
            Err(_) => Ok(false),
        }
    }

    async fn checkout_branch_inner(
        &self,
        project_id: ProjectId,
        repo_path: &Path,
        branch: &str,
        create_if_missing: bool,
    ) -> Result<()> {
        let _lock = self.git_lock.lock().await;
        let handle = self.repos.get(repo_path).await?;
        let repo = handle.lock().await;

        if working_tree_is_dirty(&repo)? {
            return Err(Error::WorkingTreeDirty(project_id));
        }

        let branch_ref = format!("refs/heads/{branch}");
        if repo.find_reference(&branch_ref).is_err() {
            if !create_if_missing {
                return Err(Error::InvalidInput(format!("branch {branch} does not exist")));
            }
            let head_commit = repo.head()?.peel_to_commit()?;
            repo.branch(branch, &head_commit, false)?;
        }

        repo.set_head(&branch_ref)?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;

        let landed = repo.head()?.shorthand().map(str::to_string);
        if landed.as_deref() != Some(branch) {
            return Err(Error::InvalidInput(format!(
                "checkout did not land on {branch}, HEAD is at {landed:?}"
            )));
        }
        Ok(())
    }

    /// Stages the listed paths (or everything changed, if empty) and commits
    /// them atomically (§4.2.1). Fails with [`Error::InvalidInput`] if the
    /// resulting tree is identical to HEAD's and `allow_empty` is false.
    pub async fn atomic_commit(
        &self,
        db: &Db,
        project_id: ProjectId,
        repo_path: &Path,
        message: &str,
        paths: &[String],
        allow_empty: bool,
    ) -> Result<String> {
        let op = self
            .begin(db, project_id, GitOperationKind::Commit, None, Some(message.to_string()))
            .await?;
        let result = self
            .atomic_commit_inner(repo_path, message, paths, allow_empty)
            .await;

        match &result {
            Ok(oid) => {
                GitOperationRepo::update_status(
                    db,
                    op.id,
                    GitOperationStatus::Completed,
                    GitOperationUpdate {
                        post_commit: Some(oid.clone()),
                        files_affected: Some(paths.to_vec()),
                        completed_at: Some(chrono::Utc::now().naive_utc()),
                        ..Default::default()
                    },
                )
                .await?;
            }
            Err(e) => {
                GitOperationRepo::update_status(
                    db,
                    op.id,
                    GitOperationStatus::Failed,
                    GitOperationUpdate {
                        error: Some(e.to_string()),
                        completed_at: Some(chrono::Utc::now().naive_utc()),
                        ..Default::default()
                    },
                )
                .await?;
            }
        }
        result
    }

    async fn atomic_commit_inner(
        &self,
        repo_path: &Path,
        message: &str,
        paths: &[String],
        allow_empty: bool,
    ) -> Result<String> {
        let _lock = self.git_lock.lock().await;
        let handle = self.repos.get(repo_path).await?;
        let repo = handle.lock().await;

        let mut index = repo.index()?;
        if paths.is_empty() {
            index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        } else {
            for p in paths {
                index.add_path(Path::new(p))?;
            }
        }
        index.write()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;

        let parent = find_head_commit(&repo)?;
        if let Some(ref parent) = parent {
            if !allow_empty && parent.tree_id() == tree_oid {
                return Err(Error::InvalidInput("nothing to commit".into()));
            }
        }

        let signature = Signature::now(COMMIT_AUTHOR_NAME, COMMIT_AUTHOR_EMAIL)?;
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        Ok(oid.to_string())
    }

    /// Hard-resets HEAD and the working tree to `target_commit` (§4.2.1).
    pub async fn rollback(
        &self,
        db: &Db,
        project_id: ProjectId,
        repo_path: &Path,
        target_commit: &str,
    ) -> Result<()> {
        let op = self.begin(db, project_id, GitOperationKind::Rollback, None, Some(target_commit.to_string())).await?;
        let result = self.rollback_inner(repo_path, target_commit).await;
        self.finish(db, op.id, result.as_ref().err()).await?;
        result
    }

    async fn rollback_inner(&self, repo_path: &Path, target_commit: &str) -> Result<()> {
        let _lock = self.git_lock.lock().await;
        let handle = self.repos.get(repo_path).await?;
        let repo = handle.lock().await;

        let oid = git2::Oid::from_str(target_commit)
            .map_err(|e| Error::InvalidInput(format!("invalid commit oid {target_commit}: {e}")))?;
        let object = repo.find_object(oid, Some(ObjectType::Commit))?;

        let head_oid = repo.head()?.peel_to_commit()?.id();
        if head_oid != oid && !repo.graph_descendant_of(head_oid, oid)? {
            return Err(Error::InvalidInput(format!(
                "{target_commit} is not an ancestor of HEAD, refusing to roll back"
            )));
        }

        repo.reset(&object, git2::ResetType::Hard, None)?;
        Ok(())
    }

    /// Discards uncommitted changes and untracked files without moving HEAD
    /// (§4.2.1).
    pub async fn reset_working_tree(&self, db: &Db, project_id: ProjectId, repo_path: &Path) -> Result<()> {
        let op = self
            .begin(db, project_id, GitOperationKind::Rollback, None, Some("reset working tree".into()))
            .await?;
        let result = self.reset_working_tree_inner(repo_path).await;
        self.finish(db, op.id, result.as_ref().err()).await?;
        result
    }

    async fn reset_working_tree_inner(&self, repo_path: &Path) -> Result<()> {
        let _lock = self.git_lock.lock().await;
        let handle = self.repos.get(repo_path).await?;
        let repo = handle.lock().await;

        let head = repo.head()?.peel_to_commit()?;
        repo.reset(
            head.as_object(),
            git2::ResetType::Hard,
            Some(git2::build::CheckoutBuilder::new().force().remove_untracked(true)),
        )?;
        Ok(())
    }

    /// Restores a previously captured snapshot (§4.2.1, §4.2.3). Refuses to
    /// overwrite a dirty working tree unless `force` is set.
    pub async fn restore_snapshot(
        &self,
        db: &Db,
        project_id: ProjectId,
        repo_path: &Path,
        snapshot_id: SnapshotId,
        force: bool,
    ) -> Result<()> {
        let op = self
            .begin(db, project_id, GitOperationKind::Restore, None, None)
            .await?;
        let result = self.restore_snapshot_inner(db, repo_path, snapshot_id, force).await;
        self.finish(db, op.id, result.as_ref().err()).await?;
        result
    }

    async fn restore_snapshot_inner(
        &self,
        db: &Db,
        repo_path: &Path,
        snapshot_id: SnapshotId,
        force: bool,
    ) -> Result<()> {
        let snapshot = SnapshotRepo::get_by_id(db, snapshot_id).await?;

        let _lock = self.git_lock.lock().await;
        let handle = self.repos.get(repo_path).await?;
        let repo = handle.lock().await;

        if !force && working_tree_is_dirty(&repo)? {
            return Err(Error::RestoreFailed {
                snapshot: snapshot_id,
                reason: "working tree has uncommitted changes".into(),
            });
        }

        match snapshot.kind {
            SnapshotKind::Snapshot => {
                let commit = snapshot.source_commit.ok_or_else(|| Error::RestoreFailed {
                    snapshot: snapshot_id,
                    reason: "lightweight snapshot has no recorded commit".into(),
                })?;
                let oid = git2::Oid::from_str(&commit).map_err(|e| Error::RestoreFailed {
                    snapshot: snapshot_id,
                    reason: e.to_string(),
                })?;
                let object = repo.find_object(oid, Some(ObjectType::Commit))?;
                repo.reset(
                    &object,
                    git2::ResetType::Hard,
                    Some(git2::build::CheckoutBuilder::new().force()),
                )?;
            }
            SnapshotKind::Full => {
                drop(repo);
                // Clear whatever is on disk now (including anything created
                // or modified since the snapshot was taken) before laying the
                // archive back down, or post-snapshot additions would survive
                // the restore alongside the restored tree.
                clear_directory_preserving(repo_path, &[".buildforge"])?;
                unzip_directory(Path::new(&snapshot.storage_path), repo_path)?;
                // The zip carries its own `.git`, which now overwrites HEAD,
                // refs and the index on disk; the cached handle's view of
                // them is stale, so evict it and let the next access reopen.
                self.repos.evict(repo_path).await;
            }
        }
        Ok(())
    }

    // -- GitOperation lifecycle helpers shared by every mutating method.

    async fn begin(
        &self,
        db: &Db,
        project_id: ProjectId,
        kind: GitOperationKind,
        branch: Option<String>,
        message: Option<String>,
    ) -> Result<crate::model::git_operation::GitOperation> {
        let op = GitOperationRepo::create(
            db,
            GitOperationForCreate {
                project_id,
                kind,
                branch,
                message,
            },
        )
        .await?;
        GitOperationRepo::update_status(db, op.id, GitOperationStatus::InProgress, GitOperationUpdate::default())
            .await
    }

    async fn finish(&self, db: &Db, op_id: crate::ids::GitOperationId, error: Option<&Error>) -> Result<()> {
        let (status, update) = match error {
            None => (
                GitOperationStatus::Completed,
                GitOperationUpdate {
                    completed_at: Some(chrono::Utc::now().naive_utc()),
                    ..Default::default()
                },
            ),
            Some(e) => {
                warn!(operation = %op_id, error = %e, "git operation failed");
                (
                    GitOperationStatus::Failed,
                    GitOperationUpdate {
                        error: Some(e.to_string()),
                        completed_at: Some(chrono::Utc::now().naive_utc()),
                        ..Default::default()
                    },
                )
            }
        };
        GitOperationRepo::update_status(db, op_id, status, update).await?;
        info!(operation = %op_id, "git operation finished");
        Ok(())
    }
}

fn current_branch_and_commit(repo: &Repository) -> Result<(String, Option<String>)> {
    match repo.head() {
        Ok(head) => {
            let branch = head.shorthand().unwrap_or("HEAD").to_string();
            let commit = head.peel_to_commit().ok().map(|c| c.id().to_string());
            Ok((branch, commit))
        }
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            Ok(("HEAD".to_string(), None))
        }
        Err(e) => Err(e.into()),
    }
}

fn find_head_commit(repo: &Repository) -> Result<Option<git2::Commit<'_>>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn working_tree_is_dirty(repo: &Repository) -> Result<bool> {
    let mut opts = git2::StatusOptions::new();
    opts.include_untracked(true);
    let statuses = repo.statuses(Some(&mut opts))?;
    Ok(!statuses.is_empty())
}

fn snapshots_dir(repo_path: &Path) -> PathBuf {
    repo_path.join(".buildforge").join("snapshots")
}

/// Zips `src`, including `.git` so a `Full` snapshot can restore history and
/// not just file contents, but skipping the snapshots directory itself
/// (`.buildforge`), since it lives inside `src` and would otherwise grow
/// every zip it's a part of.
fn zip_directory(src: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::create(dest)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut stack = vec![src.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let rel = path.strip_prefix(src).unwrap_or(&path);
            if rel.starts_with(".buildforge") {
                continue;
            }
            if path.is_dir() {
                writer.add_directory(rel.to_string_lossy(), options)?;
                stack.push(path);
            } else {
                writer.start_file(rel.to_string_lossy(), options)?;
                let mut f = std::fs::File::open(&path)?;
                std::io::copy(&mut f, &mut writer)?;
            }
        }
    }
    writer.finish()?;
    Ok(())
}

/// Removes every entry directly under `dest` except those named in
/// `preserve`, so a `Full` restore can clear stale post-snapshot state
/// without deleting the snapshot storage directory that lives inside the
/// same working tree.
fn clear_directory_preserving(dest: &Path, preserve: &[&str]) -> Result<()> {
    if !dest.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dest)? {
        let entry = entry?;
        let name = entry.file_name();
        if preserve.iter().any(|p| name.to_string_lossy() == *p) {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn unzip_directory(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| Error::ExtractorFailure(e.to_string()))?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| Error::ExtractorFailure(e.to_string()))?;
        let out_path = dest.join(entry.name());
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::db::new_db_pool_in_memory;
    use tempfile::TempDir;

    fn init_repo_with_commit(dir: &Path) {
        let repo = Repository::init(dir).expect("init");
        std::fs::write(dir.join("a.txt"), "hello").expect("write");
        let mut index = repo.index().expect("index");
        index.add_path(Path::new("a.txt")).expect("add");
        index.write().expect("write index");
        let tree = repo.find_tree(index.write_tree().expect("write tree")).expect("find tree");
        let sig = Signature::now(COMMIT_AUTHOR_NAME, COMMIT_AUTHOR_EMAIL).expect("sig");
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).expect("commit");
    }

    #[tokio::test]
    async fn atomic_commit_records_completed_operation() {
        let db = new_db_pool_in_memory().await.expect("db");
        let project = crate::model::project::ProjectRepo::create(
            &db,
            crate::model::project::ProjectForCreate {
                name: "p1".into(),
                path: "/tmp/unused".into(),
                description: None,
            },
        )
        .await
        .expect("create project");

        let dir = TempDir::new().expect("temp dir");
        init_repo_with_commit(dir.path());
        std::fs::write(dir.path().join("b.txt"), "world").expect("write");

        let safety = GitSafety::new(4);
        let oid = safety
            .atomic_commit(&db, project.id, dir.path(), "add b", &["b.txt".to_string()], false)
            .await
            .expect("commit");
        assert_eq!(oid.len(), 40);

        let ops = GitOperationRepo::list_by_project(&db, project.id).await.expect("list");
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].status, GitOperationStatus::Completed);
    }

    #[tokio::test]
    async fn empty_commit_without_allow_empty_is_rejected() {
        let db = new_db_pool_in_memory().await.expect("db");
        let project = crate::model::project::ProjectRepo::create(
            &db,
            crate::model::project::ProjectForCreate {
                name: "p2".into(),
                path: "/tmp/unused".into(),
                description: None,
            },
        )
        .await
        .expect("create project");

        let dir = TempDir::new().expect("temp dir");
        init_repo_with_commit(dir.path());

        let safety = GitSafety::new(4);
        let err = safety
            .atomic_commit(&db, project.id, dir.path(), "noop", &[], false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    async fn make_project(db: &Db, name: &str) -> crate::model::project::Project {
        crate::model::project::ProjectRepo::create(
            db,
            crate::model::project::ProjectForCreate {
                name: name.into(),
                path: "/tmp/unused".into(),
                description: None,
            },
        )
        .await
        .expect("create project")
    }

    #[tokio::test]
    async fn rollback_to_non_ancestor_is_rejected() {
        let db = new_db_pool_in_memory().await.expect("db");
        let project = make_project(&db, "p3").await;

        let dir = TempDir::new().expect("temp dir");
        init_repo_with_commit(dir.path());
        let repo = Repository::open(dir.path()).expect("open");
        let tree = repo.head().expect("head").peel_to_commit().expect("commit").tree().expect("tree");
        let sig = Signature::now("t", "t@t").expect("sig");
        // A root commit sharing the same tree but no parent: not reachable
        // from HEAD by any ancestry path.
        let unrelated = repo.commit(None, &sig, &sig, "unrelated", &tree, &[]).expect("detached commit");
        drop(repo);

        let safety = GitSafety::new(4);
        let err = safety
            .rollback(&db, project.id, dir.path(), &unrelated.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn rollback_to_ancestor_succeeds() {
        let db = new_db_pool_in_memory().await.expect("db");
        let project = make_project(&db, "p4").await;

        let dir = TempDir::new().expect("temp dir");
        init_repo_with_commit(dir.path());
        let repo = Repository::open(dir.path()).expect("open");
        let first_oid = repo.head().unwrap().peel_to_commit().unwrap().id();
        drop(repo);

        std::fs::write(dir.path().join("b.txt"), "world").expect("write");
        let safety = GitSafety::new(4);
        safety
            .atomic_commit(&db, project.id, dir.path(), "add b", &["b.txt".to_string()], false)
            .await
            .expect("commit");

        safety
            .rollback(&db, project.id, dir.path(), &first_oid.to_string())
            .await
            .expect("rollback to ancestor");

        let repo = Repository::open(dir.path()).expect("open");
        assert_eq!(repo.head().unwrap().peel_to_commit().unwrap().id(), first_oid);
    }

    #[tokio::test]
    async fn checkout_branch_refuses_dirty_working_tree() {
        let db = new_db_pool_in_memory().await.expect("db");
        let project = make_project(&db, "p5").await;

        let dir = TempDir::new().expect("temp dir");
        init_repo_with_commit(dir.path());
        std::fs::write(dir.path().join("a.txt"), "modified").expect("dirty the tree");

        let safety = GitSafety::new(4);
        let err = safety
            .checkout_branch(&db, project.id, dir.path(), "feature", true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WorkingTreeDirty(id) if id == project.id));
    }

    #[tokio::test]
    async fn checkout_branch_already_current_records_no_operation() {
        let db = new_db_pool_in_memory().await.expect("db");
        let project = make_project(&db, "p6").await;

        let dir = TempDir::new().expect("temp dir");
        init_repo_with_commit(dir.path());
        let current_branch = Repository::open(dir.path())
            .expect("open")
            .head()
            .expect("head")
            .shorthand()
            .expect("shorthand")
            .to_string();

        let safety = GitSafety::new(4);
        safety
            .checkout_branch(&db, project.id, dir.path(), &current_branch, false)
            .await
            .expect("checkout current branch");

        let ops = GitOperationRepo::list_by_project(&db, project.id).await.expect("list");
        assert!(ops.is_empty(), "checking out the already-current branch must not record an operation");
    }

    #[tokio::test]
    async fn full_snapshot_restore_undoes_history() {
        let db = new_db_pool_in_memory().await.expect("db");
        let project = make_project(&db, "p7").await;

        let dir = TempDir::new().expect("temp dir");
        init_repo_with_commit(dir.path());
        let pre_oid = Repository::open(dir.path()).expect("open").head().unwrap().peel_to_commit().unwrap().id();

        let safety = GitSafety::new(4);
        let snapshot = safety
            .snapshot(&db, project.id, dir.path(), SnapshotKind::Full, 7, None)
            .await
            .expect("snapshot");

        std::fs::write(dir.path().join("b.txt"), "world").expect("write");
        safety
            .atomic_commit(&db, project.id, dir.path(), "add b", &["b.txt".to_string()], false)
            .await
            .expect("commit");

        safety
            .restore_snapshot(&db, project.id, dir.path(), snapshot.id, true)
            .await
            .expect("restore");

        let repo = Repository::open(dir.path()).expect("open");
        assert_eq!(repo.head().unwrap().peel_to_commit().unwrap().id(), pre_oid);
        assert!(dir.path().join("a.txt").exists(), "pre-snapshot file must still be present");
        assert!(
            !dir.path().join("b.txt").exists(),
            "file added after the snapshot was taken must not survive a restore"
        );
    }
}
