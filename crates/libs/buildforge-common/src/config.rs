//! 12-factor configuration loading.
//!
//! Precedence (highest to lowest): `PORT`/`HOST` env vars, `config/{RUN_MODE}.toml`,
//! `config/default.toml`, hardcoded defaults below.

use config::{Config, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub build: BuildConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Tunables for the Repo Guard, Log Bus, Task Runtime and Build Pipeline.
/// Every field has a spec-mandated default (§4.1-§4.5); all are overridable
/// so integration tests can shrink timeouts.
#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Repo Guard `WithProject` acquisition timeout, in seconds.
    #[serde(default = "default_repo_guard_timeout_secs")]
    pub repo_guard_timeout_secs: u64,

    /// Threshold above which a `.git/index.lock` is considered stale and
    /// auto-cleared rather than surfaced as `StaleLock`.
    #[serde(default = "default_stale_lock_max_age_secs")]
    pub stale_lock_max_age_secs: u64,

    /// Default TTL applied to the pre-flight `full` snapshot taken in stage 3.
    #[serde(default = "default_snapshot_ttl_days")]
    pub snapshot_ttl_days: i64,

    /// Capacity of the LRU cache bounding concurrently open `git2::Repository`
    /// handles (§4.2, repo cache).
    #[serde(default = "default_repo_cache_size")]
    pub repo_cache_size: usize,

    /// Log Bus ring buffer size per task (§4.3).
    #[serde(default = "default_log_ring_size")]
    pub log_ring_size: usize,

    /// Log Bus per-subscriber bounded channel capacity (§4.3).
    #[serde(default = "default_log_subscriber_capacity")]
    pub log_subscriber_capacity: usize,

    /// Heartbeat interval, in seconds, for idle subscribers (§4.3).
    #[serde(default = "default_log_heartbeat_secs")]
    pub log_heartbeat_secs: u64,

    /// Grace period, in seconds, a closed stream is kept around for
    /// straggling subscribers before teardown (§4.3).
    #[serde(default = "default_log_teardown_grace_secs")]
    pub log_teardown_grace_secs: u64,

    /// Max concurrently `running` tasks across the whole process (§4.4.3).
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Per-task deadline, in seconds, before `Timeout` cancellation (§4.4.1).
    #[serde(default = "default_task_deadline_secs")]
    pub task_deadline_secs: u64,

    /// Grace period, in seconds, between cooperative Gradle termination and
    /// a forced kill of its process group (§4.5.2).
    #[serde(default = "default_gradle_kill_grace_secs")]
    pub gradle_kill_grace_secs: u64,

    /// Inactivity watchdog on Gradle output, in seconds (§4.5.2).
    #[serde(default = "default_gradle_inactivity_secs")]
    pub gradle_inactivity_secs: u64,

    /// Default Gradle task line, e.g. `clean :app:assembleRelease` (§4.5.1 stage 7).
    #[serde(default = "default_gradle_task_line")]
    pub gradle_task_line: Vec<String>,

    /// How often, in seconds, the background sweep removes expired
    /// snapshots' on-disk storage and marks them inactive (§3).
    #[serde(default = "default_snapshot_gc_interval_secs")]
    pub snapshot_gc_interval_secs: u64,
}

fn default_repo_guard_timeout_secs() -> u64 {
    30
}
fn default_stale_lock_max_age_secs() -> u64 {
    3600
}
fn default_snapshot_ttl_days() -> i64 {
    7
}
fn default_repo_cache_size() -> usize {
    8
}
fn default_log_ring_size() -> usize {
    2000
}
fn default_log_subscriber_capacity() -> usize {
    128
}
fn default_log_heartbeat_secs() -> u64 {
    15
}
fn default_log_teardown_grace_secs() -> u64 {
    60
}
fn default_max_concurrent_tasks() -> usize {
    3
}
fn default_task_deadline_secs() -> u64 {
    1800
}
fn default_gradle_kill_grace_secs() -> u64 {
    10
}
fn default_gradle_inactivity_secs() -> u64 {
    600
}
fn default_gradle_task_line() -> Vec<String> {
    vec!["clean".to_string(), ":app:assembleRelease".to_string()]
}
fn default_snapshot_gc_interval_secs() -> u64 {
    3600
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            repo_guard_timeout_secs: default_repo_guard_timeout_secs(),
            stale_lock_max_age_secs: default_stale_lock_max_age_secs(),
            snapshot_ttl_days: default_snapshot_ttl_days(),
            repo_cache_size: default_repo_cache_size(),
            log_ring_size: default_log_ring_size(),
            log_subscriber_capacity: default_log_subscriber_capacity(),
            log_heartbeat_secs: default_log_heartbeat_secs(),
            log_teardown_grace_secs: default_log_teardown_grace_secs(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            task_deadline_secs: default_task_deadline_secs(),
            gradle_kill_grace_secs: default_gradle_kill_grace_secs(),
            gradle_inactivity_secs: default_gradle_inactivity_secs(),
            gradle_task_line: default_gradle_task_line(),
            snapshot_gc_interval_secs: default_snapshot_gc_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8765,
            },
            build: BuildConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration with 12-factor app compliant env var support.
    ///
    /// Priority order (highest to lowest):
    /// 1. `PORT` / `HOST` env vars (12-factor standard)
    /// 2. Config files (`config/default.toml`, `config/{run_mode}.toml`)
    /// 3. Hardcoded defaults (port 8765)
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8765)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false));

        if let Ok(port) = env::var("PORT") {
            if let Ok(p) = port.parse::<i64>() {
                builder = builder.set_override("server.port", p)?;
            }
        }
        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        builder.build()?.try_deserialize()
    }
}
