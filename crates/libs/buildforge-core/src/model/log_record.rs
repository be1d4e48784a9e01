//! LogRecord entity (§3, §4.3): the unit of data carried by the Log Bus.
//!
//! Unlike the other entities in this module, records are not persisted to
//! the relational store — they live only in a [`crate::log_bus::LogBus`]
//! ring buffer and per-subscriber queue for the lifetime of a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Monotonically increasing within a single task's stream; subscribers
    /// use this to detect gaps left by dropped records (§4.3 backpressure).
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub text: String,
    /// Identifies the pipeline stage or subsystem that emitted the record
    /// (e.g. `"gradle"`, `"extractor"`, `"git"`).
    pub source: Option<String>,
    /// Progress hint in `0..=100`, mirrors [`crate::model::task::Task::progress`]
    /// when the record accompanies a milestone.
    pub progress: Option<u8>,
}

impl LogRecord {
    pub fn new(seq: u64, level: LogLevel, text: impl Into<String>) -> Self {
        Self {
            seq,
            timestamp: Utc::now(),
            level,
            text: text.into(),
            source: None,
            progress: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
}
