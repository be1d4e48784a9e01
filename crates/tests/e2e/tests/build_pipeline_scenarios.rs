//! Build Pipeline scenario tests (§8): failure handling and snapshot
//! recovery that the in-crate unit tests in `buildforge-build` don't cover
//! because they need a cancel-aware `GradleRunner` and a second Git
//! operation layered on top of a completed build.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use buildforge_build::extractor::FakeExtractor;
use buildforge_build::gradle::{GradleLine, GradleOutcome, GradleRunner, CANCELLED_EXIT};
use buildforge_build::pipeline::BuildPipeline;
use buildforge_common::config::AppConfig;
use buildforge_core::error::Result;
use buildforge_core::model::git_operation::GitOperationKind;
use buildforge_core::model::project::{Project, ProjectForCreate, ProjectRepo};
use buildforge_core::model::snapshot::{SnapshotKind, SnapshotRepo};
use buildforge_core::model::task::{TaskForCreate, TaskRepo, TaskStatus};
use buildforge_core::store::db::new_db_pool_in_memory;
use buildforge_core::store::Db;
use buildforge_core::Kind;
use buildforge_core::Runtime;
use tokio_util::sync::CancellationToken;

async fn setup_project(db: &Db, repo_path: &Path, app_name: &str) -> (Project, String) {
    let pre_build_oid = e2e_tests::fixtures::init_git_project(repo_path, app_name, "manifest.json");
    let project = ProjectRepo::create(
        db,
        ProjectForCreate {
            name: "demo".into(),
            path: repo_path.display().to_string(),
            description: None,
        },
    )
    .await
    .expect("create project");
    (project, pre_build_oid)
}

fn seed_apk(repo_path: &Path) {
    let outputs_dir = e2e_tests::fixtures::apk_outputs_dir(repo_path);
    std::fs::create_dir_all(&outputs_dir).expect("outputs dir");
    std::fs::write(outputs_dir.join("app-release.apk"), b"fake apk bytes").expect("write apk");
}

/// A `GradleRunner` that stays running until asked to cancel, simulating a
/// long-running `assembleRelease` invocation that's killed mid-flight.
struct CancelAwareGradleRunner;

impl GradleRunner for CancelAwareGradleRunner {
    fn run<'a>(
        &'a self,
        _repo_path: &'a Path,
        _task_line: &'a [String],
        on_line: &'a mut (dyn FnMut(GradleLine<'_>) + Send),
        cancel: CancellationToken,
        _inactivity_timeout: Duration,
    ) -> impl Future<Output = Result<GradleOutcome>> + Send + 'a {
        async move {
            on_line(GradleLine { text: "> Task :app:assembleRelease", is_stderr: false });
            cancel.cancelled().await;
            Ok(GradleOutcome { exit_code: CANCELLED_EXIT })
        }
    }
}

/// Scenario 3: Gradle exits non-zero. The resource swap from stage 6 is not
/// rolled back and HEAD stays put — recovery is only attempted for stage
/// 3-6 failures, never for a classified Gradle exit code.
#[tokio::test]
async fn gradle_failure_keeps_resource_change_and_head() {
    let db = new_db_pool_in_memory().await.expect("db");
    let dir = tempfile::tempdir().expect("tempdir");
    let (project, pre_build_oid) = setup_project(&db, dir.path(), "com.example.app").await;

    let task = TaskRepo::create(
        &db,
        TaskForCreate {
            project_id: project.id,
            branch: "build/demo".into(),
            archive_path: dir.path().join("upload.zip").display().to_string(),
            config: serde_json::json!({}),
        },
    )
    .await
    .expect("create task");
    std::fs::write(&task.archive_path, b"placeholder").expect("write archive placeholder");

    let mut config = AppConfig::default();
    config.build.task_deadline_secs = 30;
    let runtime = Arc::new(Runtime::new(config, db).await.expect("runtime"));

    let gradle = buildforge_build::gradle::FakeGradleRunner {
        lines: vec![("BUILD FAILED".into(), false)],
        exit_code: 1,
    };
    let extractor = FakeExtractor::ok("com.example.app", 1);
    let pipeline = Arc::new(BuildPipeline::new(runtime.clone(), gradle, extractor));

    let result = pipeline.run(task.id).await;
    assert!(result.is_err());

    let finished = TaskRepo::get_by_id(&runtime.db, task.id).await.expect("get task");
    assert_eq!(finished.status, TaskStatus::Failed);
    assert_eq!(finished.error_kind, Some(Kind::GradleExitNonZero));

    // The stage-6 swap replaced the app directory with the extractor's
    // (empty) staging copy; a recovered run would have put the seeded
    // manifest file back.
    let app_dir = dir.path().join("app/src/main/assets/apps/com.example.app");
    assert!(!app_dir.join("manifest.json").exists(), "resource swap should not have been rolled back");

    let repo = git2::Repository::open(dir.path()).expect("open repo");
    let head = repo.head().expect("head").peel_to_commit().expect("commit").id().to_string();
    assert_eq!(head, pre_build_oid, "HEAD must not move on a classified Gradle failure");
}

/// Scenario 4: cancelling mid-Gradle reaches a terminal `cancelled` status
/// quickly, without rolling back the resource swap either — cancellation is
/// classified the same way a non-zero exit code is, after the recoverable
/// stages already returned successfully.
#[tokio::test]
async fn cancel_mid_gradle_reaches_cancelled_without_rollback() {
    let db = new_db_pool_in_memory().await.expect("db");
    let dir = tempfile::tempdir().expect("tempdir");
    let (project, pre_build_oid) = setup_project(&db, dir.path(), "com.example.app").await;

    let task = TaskRepo::create(
        &db,
        TaskForCreate {
            project_id: project.id,
            branch: "build/demo".into(),
            archive_path: dir.path().join("upload.zip").display().to_string(),
            config: serde_json::json!({}),
        },
    )
    .await
    .expect("create task");
    std::fs::write(&task.archive_path, b"placeholder").expect("write archive placeholder");

    let mut config = AppConfig::default();
    config.build.task_deadline_secs = 30;
    let runtime = Arc::new(Runtime::new(config, db).await.expect("runtime"));

    let extractor = FakeExtractor::ok("com.example.app", 1);
    let pipeline = Arc::new(BuildPipeline::new(runtime.clone(), CancelAwareGradleRunner, extractor));

    let task_id = task.id;
    let run_runtime = runtime.clone();
    let run_pipeline = pipeline.clone();
    let handle = tokio::spawn(async move { run_pipeline.run(task_id).await });

    // Give the pipeline a moment to clear stages 1-6 and reach Gradle.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let cancelled = run_runtime.task_runtime.cancel(task_id).await;
    assert!(cancelled, "task must still be tracked as cancellable");

    let result = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("pipeline did not reach a terminal state within 10s")
        .expect("join");
    assert!(result.is_err());

    let finished = TaskRepo::get_by_id(&runtime.db, task_id).await.expect("get task");
    assert_eq!(finished.status, TaskStatus::Cancelled);
    assert_eq!(finished.error_kind, Some(Kind::Cancelled));

    let app_dir = dir.path().join("app/src/main/assets/apps/com.example.app");
    assert!(!app_dir.join("manifest.json").exists(), "resource swap should not have been rolled back on cancel either");

    let repo = git2::Repository::open(dir.path()).expect("open repo");
    let head = repo.head().expect("head").peel_to_commit().expect("commit").id().to_string();
    assert_eq!(head, pre_build_oid, "HEAD must not move on cancellation");
}

/// Scenario 6: restoring the pre-build snapshot after a completed build and
/// a follow-up commit returns HEAD and the working tree to the pre-build
/// state, and records a new `Restore` operation — the post-build commit
/// stays reachable only through reflog, not the branch tip.
#[tokio::test]
async fn restore_snapshot_after_build_returns_to_pre_build_state() {
    let db = new_db_pool_in_memory().await.expect("db");
    let dir = tempfile::tempdir().expect("tempdir");
    let (project, pre_build_oid) = setup_project(&db, dir.path(), "com.example.app").await;
    seed_apk(dir.path());

    let task = TaskRepo::create(
        &db,
        TaskForCreate {
            project_id: project.id,
            branch: "main".into(),
            archive_path: dir.path().join("upload.zip").display().to_string(),
            config: serde_json::json!({}),
        },
    )
    .await
    .expect("create task");
    std::fs::write(&task.archive_path, b"placeholder").expect("write archive placeholder");

    let mut config = AppConfig::default();
    config.build.task_deadline_secs = 30;
    let runtime = Arc::new(Runtime::new(config, db).await.expect("runtime"));

    let gradle = buildforge_build::gradle::FakeGradleRunner {
        lines: vec![("BUILD SUCCESSFUL".into(), false)],
        exit_code: 0,
    };
    let extractor = FakeExtractor::ok("com.example.app", 1);
    let pipeline = Arc::new(BuildPipeline::new(runtime.clone(), gradle, extractor));

    pipeline.run(task.id).await.expect("pipeline run");
    let finished = TaskRepo::get_by_id(&runtime.db, task.id).await.expect("get task");
    assert_eq!(finished.status, TaskStatus::Completed);

    // A user commits the build's resource swap on top of the pre-build history.
    runtime
        .git_safety
        .atomic_commit(&runtime.db, project.id, dir.path(), "ship build output", &[], true)
        .await
        .expect("atomic commit");

    let repo = git2::Repository::open(dir.path()).expect("open repo");
    let post_build_oid = repo.head().expect("head").peel_to_commit().expect("commit").id().to_string();
    assert_ne!(post_build_oid, pre_build_oid);
    drop(repo);

    let snapshots = SnapshotRepo::list_active_by_project(&runtime.db, project.id)
        .await
        .expect("list snapshots");
    let pre_build_snapshot = snapshots
        .iter()
        .find(|s| s.kind == SnapshotKind::Full)
        .expect("pipeline must have captured a pre-build snapshot");

    runtime
        .git_safety
        .restore_snapshot(&runtime.db, project.id, dir.path(), pre_build_snapshot.id, true)
        .await
        .expect("restore snapshot");

    let repo = git2::Repository::open(dir.path()).expect("open repo");
    let restored_oid = repo.head().expect("head").peel_to_commit().expect("commit").id().to_string();
    assert_eq!(restored_oid, pre_build_oid, "HEAD must return to the pre-build commit");

    let app_dir = dir.path().join("app/src/main/assets/apps/com.example.app");
    assert!(app_dir.join("manifest.json").exists(), "pre-build seed file must reappear");

    let operations = buildforge_core::model::git_operation::GitOperationRepo::list_by_project(&runtime.db, project.id)
        .await
        .expect("list operations");
    assert!(
        operations.iter().any(|op| op.kind == GitOperationKind::Restore),
        "a Restore operation must be recorded"
    );
    assert!(
        !operations.iter().any(|op| op.kind == GitOperationKind::BranchSwitch),
        "stage 3 checked out a branch the repo was already on, so no BranchSwitch should be recorded"
    );

    // The post-build commit is orphaned from the branch tip but still
    // resolvable directly by its own oid (reflog/object-store retention).
    assert!(git2::Oid::from_str(&post_build_oid).is_ok());
}

/// A missing archive must fail validation (stage 1) before the Repo Guard
/// lease is taken or any Git pre-flight happens — no snapshot, no branch
/// switch, and HEAD stays exactly where it started.
#[tokio::test]
async fn missing_archive_fails_before_any_git_mutation() {
    let db = new_db_pool_in_memory().await.expect("db");
    let dir = tempfile::tempdir().expect("tempdir");
    let (project, pre_build_oid) = setup_project(&db, dir.path(), "com.example.app").await;

    let task = TaskRepo::create(
        &db,
        TaskForCreate {
            project_id: project.id,
            branch: "main".into(),
            archive_path: dir.path().join("never-uploaded.zip").display().to_string(),
            config: serde_json::json!({}),
        },
    )
    .await
    .expect("create task");
    // Deliberately not writing the archive file.

    let mut config = AppConfig::default();
    config.build.task_deadline_secs = 30;
    let runtime = Arc::new(Runtime::new(config, db).await.expect("runtime"));

    let gradle = buildforge_build::gradle::FakeGradleRunner { lines: vec![], exit_code: 0 };
    let extractor = FakeExtractor::ok("com.example.app", 1);
    let pipeline = Arc::new(BuildPipeline::new(runtime.clone(), gradle, extractor));

    let result = pipeline.run(task.id).await;
    assert!(result.is_err());

    let finished = TaskRepo::get_by_id(&runtime.db, task.id).await.expect("get task");
    assert_eq!(finished.status, TaskStatus::Failed);
    assert_eq!(finished.error_kind, Some(Kind::ExtractorFailure));

    let operations = buildforge_core::model::git_operation::GitOperationRepo::list_by_project(&runtime.db, project.id)
        .await
        .expect("list operations");
    assert!(operations.is_empty(), "stage 1 must fail before any Git operation is recorded");

    let repo = git2::Repository::open(dir.path()).expect("open repo");
    let head = repo.head().expect("head").peel_to_commit().expect("commit").id().to_string();
    assert_eq!(head, pre_build_oid, "HEAD must not move when the archive is missing");
}
