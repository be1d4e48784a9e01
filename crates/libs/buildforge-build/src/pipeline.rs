//! Build Pipeline (C5): composes the Repo Guard, Git Safety Layer, Log Bus,
//! Task Runtime, a [`GradleRunner`], and an [`ArchiveExtractor`] into the
//! nine-stage build sequence of §4.5.1.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use buildforge_core::error::{Error, Result};
use buildforge_core::ids::{ProjectId, TaskId};
use buildforge_core::model::artifact::{ArtifactForCreate, ArtifactKind, ArtifactRepo};
use buildforge_core::model::log_record::{LogLevel, LogRecord};
use buildforge_core::model::project::{Project, ProjectRepo};
use buildforge_core::model::snapshot::SnapshotKind;
use buildforge_core::model::task::{Task, TaskRepo, TaskStatus, TaskStatusFields};
use buildforge_core::task_runtime::{persist_with_retry, run_with_deadline};
use buildforge_core::Runtime;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::extractor::ArchiveExtractor;
use crate::gradle::{GradleLine, GradleOutcome, GradleRunner};

const ASSETS_APPS_RELATIVE: &str = "app/src/main/assets/apps";
const APK_OUTPUTS_RELATIVE: &str = "app/build/outputs/apk";

/// Ties every other component together for a single build task.
pub struct BuildPipeline<R, E> {
    pub runtime: Arc<Runtime>,
    pub gradle: R,
    pub extractor: E,
}

impl<R, E> BuildPipeline<R, E>
where
    R: GradleRunner + 'static,
    E: ArchiveExtractor + 'static,
{
    pub fn new(runtime: Arc<Runtime>, gradle: R, extractor: E) -> Self {
        Self { runtime, gradle, extractor }
    }

    /// Runs task `task_id` through the full stage sequence, publishing
    /// progress to the Log Bus and persisting the final status. Blocks
    /// until a concurrency slot is available (§4.4.3).
    pub async fn run(self: Arc<Self>, task_id: TaskId) -> Result<()> {
        let task = TaskRepo::get_by_id(&self.runtime.db, task_id).await?;
        let project = ProjectRepo::get_by_id(&self.runtime.db, task.project_id).await?;

        let (guard, cancel) = self.runtime.task_runtime.acquire(task_id).await;

        persist_with_retry(|| {
            TaskRepo::update_status(
                &self.runtime.db,
                task_id,
                TaskStatus::Running,
                TaskStatusFields {
                    started_at: Some(chrono::Utc::now().naive_utc()),
                    ..Default::default()
                },
            )
        })
        .await?;

        self.log(task_id, LogLevel::Info, "build started", "pipeline", None).await;

        let deadline = Duration::from_secs(self.runtime.config.build.task_deadline_secs);
        let outcome = run_with_deadline(task_id, deadline, cancel.clone(), self.clone().execute(task.clone(), project, cancel.clone())).await;

        let (status, fields, log_level, message) = match &outcome {
            Ok(harvested) => (
                TaskStatus::Completed,
                TaskStatusFields {
                    progress: Some(100),
                    completed_at: Some(chrono::Utc::now().naive_utc()),
                    result: Some(serde_json::json!({ "artifact_count": harvested.artifacts.len() })),
                    ..Default::default()
                },
                LogLevel::Success,
                format!("build completed with {} artifact(s)", harvested.artifacts.len()),
            ),
            Err(Error::Cancelled(_)) => (
                TaskStatus::Cancelled,
                TaskStatusFields {
                    error_kind: Some(buildforge_core::Kind::Cancelled),
                    completed_at: Some(chrono::Utc::now().naive_utc()),
                    ..Default::default()
                },
                LogLevel::Warning,
                "build cancelled".to_string(),
            ),
            Err(err) => (
                TaskStatus::Failed,
                TaskStatusFields {
                    error_kind: err.kind(),
                    error_message: Some(err.to_string()),
                    completed_at: Some(chrono::Utc::now().naive_utc()),
                    ..Default::default()
                },
                LogLevel::Error,
                format!("build failed: {err}"),
            ),
        };

        self.log(task_id, log_level, &message, "pipeline", None).await;

        persist_with_retry(|| {
            TaskRepo::update_status(&self.runtime.db, task_id, status, fields.clone())
        })
        .await?;

        self.runtime.log_bus.close(task_id).await;
        drop(guard);

        outcome.map(|_| ())
    }

    async fn execute(self: Arc<Self>, task: Task, project: Project, cancel: CancellationToken) -> Result<Harvested> {
        // Stage 1: Validate.
        let archive_path = PathBuf::from(&task.archive_path);
        if !archive_path.exists() {
            return Err(Error::ExtractorFailure(format!(
                "archive not found at {}",
                archive_path.display()
            )));
        }
        validate_archive_extension(&archive_path)?;
        let repo_path = PathBuf::from(&project.path);
        if !repo_path.is_dir() {
            return Err(Error::ProjectMissing(project.id));
        }

        // Stage 2: Acquire. The Repo Guard lease is held for the
        // remainder of the build (stages 3-7).
        let pipeline = Arc::clone(&self);
        let project_id = project.id;
        let archive_for_task = archive_path.clone();
        let repo_path_for_task = repo_path.clone();
        let cancel_for_task = cancel.clone();
        let task_for_guard = task.clone();

        self.runtime
            .repo_guard
            .with_project(project_id, &repo_path, true, move || async move {
                pipeline
                    .run_locked_stages(task_for_guard, project_id, repo_path_for_task, archive_for_task, cancel_for_task)
                    .await
            })
            .await
    }

    async fn run_locked_stages(
        self: Arc<Self>,
        task: Task,
        project_id: ProjectId,
        repo_path: PathBuf,
        archive_path: PathBuf,
        cancel: CancellationToken,
    ) -> Result<Harvested> {
        let task_id = task.id;

        let mut replaced = false;
        let recovery = self
            .run_recoverable_stages(&task, project_id, &repo_path, &archive_path, &cancel, &mut replaced)
            .await;

        let outcome = match recovery {
            Ok(outcome) => outcome,
            Err(err) => {
                // Recovery undoes the Replace stage; nothing to undo if the
                // failure happened before Replace ever ran (stage 4 extract,
                // stage 5 name check) — in particular a `ResourcePackageMismatch`
                // must fail "before Git mutation" (§7) with no recovery-driven
                // GitOperation recorded.
                if replaced {
                    warn!(%task_id, error = %err, "pipeline stage failed after replacement, attempting recovery");
                    self.recover(project_id, &repo_path).await;
                } else {
                    warn!(%task_id, error = %err, "pipeline stage failed before replacement, skipping recovery");
                }
                return Err(err);
            }
        };

        // Stage 8: Harvest.
        self.log(task_id, LogLevel::Info, "harvesting artifacts", "pipeline", Some(90)).await;
        let artifacts = self.harvest(task_id, &repo_path).await?;

        // Stage 9: Release happens in the caller once the final status is
        // known; here we only classify the Gradle outcome.
        if outcome.was_cancelled() {
            return Err(Error::Cancelled(task_id));
        }
        if outcome.was_inactive_timeout() {
            return Err(Error::Timeout(task_id));
        }
        if !outcome.succeeded() {
            return Err(Error::GradleExitNonZero(outcome.exit_code));
        }
        if artifacts.is_empty() {
            return Err(Error::NoArtifacts(task_id));
        }

        Ok(Harvested { artifacts })
    }

    /// Stages 3-7: pre-flight snapshot, branch checkout, extraction, name
    /// check, replacement, and the Gradle run itself. A `Result::Err` here
    /// means the stage genuinely failed (as opposed to Gradle merely
    /// exiting non-zero, which is a successful *supervision* of a failed
    /// build and is handled by the caller) and triggers recovery (§4.5.3).
    async fn run_recoverable_stages(
        &self,
        task: &Task,
        project_id: ProjectId,
        repo_path: &Path,
        archive_path: &Path,
        cancel: &CancellationToken,
        replaced: &mut bool,
    ) -> Result<GradleOutcome> {
        let task_id = task.id;
        let ttl_days = self.runtime.config.build.snapshot_ttl_days;

        // Stage 3: Pre-flight Git.
        self.log(task_id, LogLevel::Info, "capturing pre-flight snapshot", "git", Some(10)).await;
        self.runtime
            .git_safety
            .snapshot_as_operation(&self.runtime.db, project_id, repo_path, SnapshotKind::Full, ttl_days)
            .await?;

        self.log(task_id, LogLevel::Info, &format!("checking out branch {}", task.branch), "git", Some(15)).await;
        self.runtime
            .git_safety
            .checkout_branch(&self.runtime.db, project_id, repo_path, &task.branch, true)
            .await?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled(task_id));
        }

        // Stage 4: Extract.
        self.log(task_id, LogLevel::Info, "extracting archive", "extractor", Some(25)).await;
        let staging = tempfile::tempdir()?;
        let extract_result = self.extractor.extract(archive_path, staging.path())?;

        // Stage 5: Name check.
        let apps_dir = repo_path.join(ASSETS_APPS_RELATIVE);
        let candidates = list_dir_names(&apps_dir)?;
        if !candidates.iter().any(|c| c == &extract_result.top_level_name) {
            return Err(Error::ResourcePackageMismatch {
                archive_name: extract_result.top_level_name,
                candidates,
            });
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled(task_id));
        }

        // Stage 6: Replace, via a sibling temp dir renamed into position so
        // a crash mid-copy leaves the previous directory intact.
        self.log(task_id, LogLevel::Info, "replacing resource package", "pipeline", Some(40)).await;
        let source_dir = staging.path().join(&extract_result.top_level_name);
        let target_dir = apps_dir.join(&extract_result.top_level_name);
        replace_directory_atomically(&source_dir, &target_dir, &apps_dir)?;
        *replaced = true;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled(task_id));
        }

        // Stage 7: Gradle.
        self.log(task_id, LogLevel::Info, "starting gradle build", "gradle", Some(45)).await;
        let task_line = self.runtime.config.build.gradle_task_line.clone();
        let inactivity = Duration::from_secs(self.runtime.config.build.gradle_inactivity_secs);

        let log_bus = Arc::clone(&self.runtime.log_bus);
        let task_runtime = Arc::clone(&self.runtime.task_runtime);
        let mut gradle_task_lines: u32 = 0;
        let mut on_line = move |line: GradleLine<'_>| {
            let (level, is_task_line) = classify_gradle_line(line.text, line.is_stderr);
            let progress = if is_task_line {
                gradle_task_lines = gradle_task_lines.saturating_add(1);
                Some(interpolate_gradle_progress(gradle_task_lines))
            } else {
                None
            };
            let record = build_log_record(level, line.text, progress);
            let log_bus = Arc::clone(&log_bus);
            let task_runtime = Arc::clone(&task_runtime);
            tokio::spawn(async move {
                log_bus.publish(task_id, record).await;
                if let Some(progress) = progress {
                    let _ = task_runtime.observe_progress(task_id, progress).await;
                }
            });
        };

        let outcome = self
            .gradle
            .run(repo_path, &task_line, &mut on_line, cancel.clone(), inactivity)
            .await?;

        info!(%task_id, exit_code = outcome.exit_code, "gradle run finished");
        Ok(outcome)
    }

    /// Best-effort recovery (§4.5.3): reset the working tree, and if that's
    /// insufficient, restore the pre-flight full snapshot by force.
    async fn recover(&self, project_id: ProjectId, repo_path: &Path) {
        if let Err(e) = self.runtime.git_safety.reset_working_tree(&self.runtime.db, project_id, repo_path).await {
            warn!(%project_id, error = %e, "reset_working_tree failed during recovery, trying snapshot restore");
            match buildforge_core::model::snapshot::SnapshotRepo::list_active_by_project(&self.runtime.db, project_id).await {
                Ok(snapshots) => {
                    if let Some(snapshot) = snapshots.into_iter().find(|s| s.kind == SnapshotKind::Full) {
                        if let Err(e) = self
                            .runtime
                            .git_safety
                            .restore_snapshot(&self.runtime.db, project_id, repo_path, snapshot.id, true)
                            .await
                        {
                            warn!(%project_id, error = %e, "snapshot restore also failed during recovery");
                        }
                    }
                }
                Err(e) => warn!(%project_id, error = %e, "failed to list snapshots during recovery"),
            }
        }
    }

    /// Stage 8: scans `app/build/outputs/apk/**/*.apk` and records each as
    /// an artifact with its size and content hash.
    async fn harvest(&self, task_id: TaskId, repo_path: &Path) -> Result<Vec<buildforge_core::model::artifact::ArtifactDescriptor>> {
        let outputs_dir = repo_path.join(APK_OUTPUTS_RELATIVE);
        let apk_paths = find_apks(&outputs_dir)?;

        let mut artifacts = Vec::with_capacity(apk_paths.len());
        for path in apk_paths {
            let bytes = tokio::fs::read(&path).await?;
            let size_bytes = bytes.len() as u64;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            let content_hash = format!("{:x}", hasher.finalize());
            let filename = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

            let artifact = ArtifactRepo::append(
                &self.runtime.db,
                task_id,
                ArtifactForCreate {
                    filename,
                    path: path.display().to_string(),
                    size_bytes,
                    content_hash,
                    kind: ArtifactKind::Apk,
                    package_info: None,
                },
            )
            .await?;
            artifacts.push(artifact);
        }
        Ok(artifacts)
    }

    async fn log(&self, task_id: TaskId, level: LogLevel, text: &str, source: &str, progress: Option<u8>) {
        let record = build_log_record(level, text, progress).with_source(source);
        self.runtime.log_bus.publish(task_id, record).await;
        if let Some(progress) = progress {
            let _ = self.runtime.task_runtime.observe_progress(task_id, progress).await;
        }
    }
}

struct Harvested {
    artifacts: Vec<buildforge_core::model::artifact::ArtifactDescriptor>,
}

fn build_log_record(level: LogLevel, text: &str, progress: Option<u8>) -> LogRecord {
    let record = LogRecord::new(0, level, text.to_string());
    match progress {
        Some(p) => record.with_progress(p),
        None => record,
    }
}

/// Maps a line of Gradle output to a log level and whether it's a
/// `> Task :...` line, per the parsing rules of §4.5.1 stage 7. The caller
/// uses the latter to drive the `gradle-running` progress interpolation
/// of §4.4.2.
fn classify_gradle_line(text: &str, is_stderr: bool) -> (LogLevel, bool) {
    if text.contains("FAILURE:") || text.contains("ERROR:") || text.contains("BUILD FAILED") {
        (LogLevel::Error, false)
    } else if text.contains("WARNING:") || text.starts_with("w:") {
        (LogLevel::Warning, false)
    } else if text.starts_with("> Task :") {
        (LogLevel::Info, true)
    } else if is_stderr {
        (LogLevel::Warning, false)
    } else {
        (LogLevel::Info, false)
    }
}

/// §4.4.2: "45→85 interpolated over parsed task counts". Gradle never
/// reports a total task count up front, so this climbs by two progress
/// points per `> Task :` line seen and plateaus at 85 until the real
/// `harvest=90` milestone takes over; a build with no task lines at all
/// (parse failure) simply never calls this and stays at 45.
fn interpolate_gradle_progress(task_lines_seen: u32) -> u8 {
    const GRADLE_START: u8 = 45;
    const GRADLE_CEILING: u8 = 85;
    let climbed = (task_lines_seen.saturating_mul(2)).min((GRADLE_CEILING - GRADLE_START) as u32) as u8;
    GRADLE_START + climbed
}

fn validate_archive_extension(path: &Path) -> Result<()> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
    match extension.as_str() {
        "zip" | "rar" | "7z" => Ok(()),
        other => Err(Error::ExtractorFailure(format!(
            "UnsupportedFormat: unrecognised archive extension '{other}'"
        ))),
    }
}

fn list_dir_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

/// Copies `source` into a sibling temp directory under `parent`, then
/// removes `target` and renames the temp directory into its place, so a
/// crash mid-copy leaves the previous `target` untouched (§4.5.1 stage 6).
fn replace_directory_atomically(source: &Path, target: &Path, parent: &Path) -> Result<()> {
    std::fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new().prefix(".replace-").tempdir_in(parent)?;
    let staged_target = staging.path().join("payload");
    copy_dir_recursive(source, &staged_target)?;

    if target.exists() {
        std::fs::remove_dir_all(target)?;
    }
    std::fs::rename(&staged_target, target)?;
    Ok(())
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let dest_path = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&path, &dest_path)?;
        } else {
            std::fs::copy(&path, &dest_path)?;
        }
    }
    Ok(())
}

fn find_apks(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("apk") {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::FakeExtractor;
    use crate::gradle::FakeGradleRunner;
    use buildforge_core::model::project::ProjectForCreate;
    use buildforge_core::model::task::TaskForCreate;
    use buildforge_core::store::db::new_db_pool_in_memory;
    use buildforge_common::config::AppConfig;

    async fn setup_project(db: &buildforge_core::store::Db, repo_path: &Path) -> Project {
        git2::Repository::init(repo_path).expect("init repo");
        std::fs::create_dir_all(repo_path.join(ASSETS_APPS_RELATIVE).join("com.example.app")).expect("apps dir");
        ProjectRepo::create(
            db,
            ProjectForCreate {
                name: "demo".into(),
                path: repo_path.display().to_string(),
                description: None,
            },
        )
        .await
        .expect("create project")
    }

    #[tokio::test]
    async fn successful_build_harvests_artifacts_and_completes() {
        let db = new_db_pool_in_memory().await.expect("db");
        let dir = tempfile::tempdir().expect("tempdir");
        let project = setup_project(&db, dir.path()).await;

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

        let outputs_dir = dir.path().join(APK_OUTPUTS_RELATIVE).join("release");
        std::fs::create_dir_all(&outputs_dir).expect("outputs dir");
        std::fs::write(outputs_dir.join("app-release.apk"), b"fake apk bytes").expect("write apk");

        let mut config = AppConfig::default();
        config.build.task_deadline_secs = 30;
        let runtime = Arc::new(Runtime::new(config, db).await.expect("runtime"));

        let gradle = FakeGradleRunner {
            lines: vec![("BUILD SUCCESSFUL".into(), false)],
            exit_code: 0,
        };
        let extractor = FakeExtractor::ok("com.example.app", 2);
        let pipeline = Arc::new(BuildPipeline::new(runtime.clone(), gradle, extractor));

        pipeline.run(task.id).await.expect("pipeline run");

        let finished = TaskRepo::get_by_id(&runtime.db, task.id).await.expect("get task");
        assert_eq!(finished.status, TaskStatus::Completed);

        let artifacts = ArtifactRepo::list_by_task(&runtime.db, task.id).await.expect("list artifacts");
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].filename, "app-release.apk");
    }

    #[tokio::test]
    async fn name_mismatch_fails_with_resource_package_mismatch() {
        let db = new_db_pool_in_memory().await.expect("db");
        let dir = tempfile::tempdir().expect("tempdir");
        let project = setup_project(&db, dir.path()).await;

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

        let runtime = Arc::new(Runtime::new(AppConfig::default(), db).await.expect("runtime"));
        let gradle = FakeGradleRunner { lines: vec![], exit_code: 0 };
        let extractor = FakeExtractor::ok("com.unrelated.app", 1);
        let pipeline = Arc::new(BuildPipeline::new(runtime.clone(), gradle, extractor));

        let result = pipeline.run(task.id).await;
        assert!(result.is_err());

        let finished = TaskRepo::get_by_id(&runtime.db, task.id).await.expect("get task");
        assert_eq!(finished.status, TaskStatus::Failed);
        assert_eq!(finished.error_kind, Some(buildforge_core::Kind::ResourcePackageMismatch));

        // Nothing was replaced yet, so recovery must not have run — in
        // particular no Rollback-kind operation from `reset_working_tree`.
        let operations = buildforge_core::model::git_operation::GitOperationRepo::list_by_project(&runtime.db, project.id)
            .await
            .expect("list git operations");
        assert!(
            !operations
                .iter()
                .any(|op| op.kind == buildforge_core::model::git_operation::GitOperationKind::Rollback),
            "a name-check failure must not trigger working-tree recovery"
        );
    }

    #[tokio::test]
    async fn no_artifacts_fails_with_no_artifacts_kind() {
        let db = new_db_pool_in_memory().await.expect("db");
        let dir = tempfile::tempdir().expect("tempdir");
        let project = setup_project(&db, dir.path()).await;

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

        let runtime = Arc::new(Runtime::new(AppConfig::default(), db).await.expect("runtime"));
        let gradle = FakeGradleRunner {
            lines: vec![("BUILD SUCCESSFUL".into(), false)],
            exit_code: 0,
        };
        let extractor = FakeExtractor::ok("com.example.app", 1);
        let pipeline = Arc::new(BuildPipeline::new(runtime.clone(), gradle, extractor));

        let result = pipeline.run(task.id).await;
        assert!(result.is_err());

        let finished = TaskRepo::get_by_id(&runtime.db, task.id).await.expect("get task");
        assert_eq!(finished.status, TaskStatus::Failed);
        assert_eq!(finished.error_kind, Some(buildforge_core::Kind::NoArtifacts));
    }
}
