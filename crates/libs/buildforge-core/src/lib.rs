//! Core domain logic for the build orchestration server: the Repo Guard
//! (C1), Git Safety Layer (C2), Log Bus (C3), Task Runtime (C4), and the
//! persistence repositories their entities are built on.

pub mod error;
pub mod git_safety;
pub mod ids;
pub mod log_bus;
pub mod model;
pub mod repo_guard;
pub mod store;
pub mod task_runtime;

pub use error::{Error, Kind, Result};

use buildforge_common::config::AppConfig;
use git_safety::GitSafety;
use log_bus::LogBus;
use repo_guard::RepoGuard;
use std::sync::Arc;
use store::Db;
use task_runtime::TaskRuntime;

/// Composition root: bundles the database connection and the four core
/// components behind a single cloneable handle, the way request handlers
/// and CLI commands reach into the system.
#[derive(Clone)]
pub struct Runtime {
    pub db: Db,
    pub config: Arc<AppConfig>,
    pub repo_guard: Arc<RepoGuard>,
    pub git_safety: Arc<GitSafety>,
    pub log_bus: Arc<LogBus>,
    pub task_runtime: Arc<TaskRuntime>,
}

impl Runtime {
    pub async fn new(config: AppConfig, db: Db) -> Result<Self> {
        let config = Arc::new(config);
        let repo_guard = Arc::new(RepoGuard::new(
            config.build.stale_lock_max_age_secs,
            config.build.repo_guard_timeout_secs,
        ));
        let git_safety = Arc::new(GitSafety::new(config.build.repo_cache_size));
        let log_bus = Arc::new(LogBus::new(
            config.build.log_ring_size,
            config.build.log_subscriber_capacity,
            config.build.log_heartbeat_secs,
            config.build.log_teardown_grace_secs,
        ));
        let task_runtime = Arc::new(TaskRuntime::new(config.build.max_concurrent_tasks));

        Ok(Self {
            db,
            config,
            repo_guard,
            git_safety,
            log_bus,
            task_runtime,
        })
    }
}
