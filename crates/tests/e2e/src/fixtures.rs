//! Shared fixture builders for end-to-end scenario tests.

use std::path::{Path, PathBuf};

use uuid::Uuid;

pub struct TestFixtures;

impl TestFixtures {
    /// Generate a unique project name for testing.
    pub fn unique_project_name() -> String {
        format!("project-{}", &Uuid::new_v4().to_string()[..8])
    }

    /// Registration payload for `POST /projects`.
    pub fn project_payload(name: &str, path: &str) -> serde_json::Value {
        serde_json::json!({ "name": name, "path": path })
    }

    /// Task creation payload for `POST /tasks`.
    pub fn task_payload(project_id: i64, branch: &str, archive_path: &str) -> serde_json::Value {
        serde_json::json!({ "project_id": project_id, "branch": branch, "archive_path": archive_path })
    }
}

/// Initializes a Git repository at `repo_path` with a single tracked asset
/// file under `app/src/main/assets/apps/<top_level_name>/<seed_file>`,
/// committed on `main` — the shape every build-pipeline scenario starts
/// from (§6.5).
pub fn init_git_project(repo_path: &Path, top_level_name: &str, seed_file: &str) -> String {
    let repo = git2::Repository::init(repo_path).expect("init repo");

    let apps_dir = repo_path.join("app/src/main/assets/apps").join(top_level_name);
    std::fs::create_dir_all(&apps_dir).expect("create apps dir");
    std::fs::write(apps_dir.join(seed_file), b"seed contents").expect("write seed file");

    let mut index = repo.index().expect("index");
    index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None).expect("stage");
    index.write().expect("write index");
    let tree_oid = index.write_tree().expect("write tree");
    let tree = repo.find_tree(tree_oid).expect("find tree");
    let signature = git2::Signature::now("buildforge-tests", "tests@buildforge.invalid").expect("signature");

    let oid = repo
        .commit(Some("HEAD"), &signature, &signature, "seed", &tree, &[])
        .expect("commit");

    if repo.head().expect("head").shorthand() != Some("main") {
        repo.reference("refs/heads/main", oid, true, "rename to main").expect("create main");
        repo.set_head("refs/heads/main").expect("set head");
    }

    oid.to_string()
}

/// Path to the Gradle APK output directory a real build would populate,
/// relative to a project's repo root (§6.5).
pub fn apk_outputs_dir(repo_path: &Path) -> PathBuf {
    repo_path.join("app/build/outputs/apk/release")
}
