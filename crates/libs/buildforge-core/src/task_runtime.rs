//! Task Runtime (C4): concurrency control, cancellation, and progress
//! bookkeeping for in-flight tasks, layered on top of the persisted
//! [`crate::model::task::Task`] state machine (§4.4).

use crate::error::{Error, Result};
use crate::ids::TaskId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

struct RunningTask {
    cancel: CancellationToken,
    /// Mirrors the persisted `progress` column; used to reject a reported
    /// progress value that would move backwards (§4.4.1 invariant).
    last_progress: AtomicU8,
}

/// Bounds how many tasks may be `running` at once (§4.4.3) and tracks the
/// cancellation token and last-seen progress for every task currently in
/// flight. Tasks in terminal states are not tracked here at all — only the
/// persistence layer remembers history.
pub struct TaskRuntime {
    semaphore: Arc<Semaphore>,
    running: Mutex<HashMap<TaskId, Arc<RunningTask>>>,
}

impl TaskRuntime {
    pub fn new(max_concurrent_tasks: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Blocks until a concurrency slot is free, then registers `task_id` as
    /// running and returns its cancellation token alongside an RAII slot.
    pub async fn acquire(self: &Arc<Self>, task_id: TaskId) -> (TaskGuard, CancellationToken) {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("semaphore is never closed");

        let cancel = CancellationToken::new();
        let entry = Arc::new(RunningTask {
            cancel: cancel.clone(),
            last_progress: AtomicU8::new(0),
        });
        self.running.lock().await.insert(task_id, Arc::clone(&entry));

        (
            TaskGuard {
                runtime: Arc::clone(self),
                task_id,
                _permit: permit,
            },
            cancel,
        )
    }

    /// Requests cooperative cancellation of a running task; returns `false`
    /// if the task isn't currently tracked (already terminal, or unknown).
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        match self.running.lock().await.get(&task_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Validates and records a progress update for a running task. Rejects
    /// any value lower than the last one recorded for this task (§4.4.1).
    pub async fn observe_progress(&self, task_id: TaskId, progress: u8) -> Result<()> {
        let running = self.running.lock().await;
        let entry = running
            .get(&task_id)
            .ok_or_else(|| Error::Conflict(format!("task {task_id} is not running")))?;
        let previous = entry.last_progress.load(Ordering::SeqCst);
        if progress < previous {
            return Err(Error::Conflict(format!(
                "task {task_id} progress regressed from {previous} to {progress}"
            )));
        }
        entry.last_progress.store(progress, Ordering::SeqCst);
        Ok(())
    }

    pub async fn active_count(&self) -> usize {
        self.running.lock().await.len()
    }

    async fn release(&self, task_id: TaskId) {
        self.running.lock().await.remove(&task_id);
    }
}

/// RAII handle released when a task finishes, whether by completion,
/// failure, cancellation, or timeout.
pub struct TaskGuard {
    runtime: Arc<TaskRuntime>,
    task_id: TaskId,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let runtime = Arc::clone(&self.runtime);
        let task_id = self.task_id;
        tokio::spawn(async move {
            runtime.release(task_id).await;
        });
    }
}

/// Runs `fut` to completion, but returns [`Error::Timeout`] if `deadline`
/// elapses or [`Error::Cancelled`] if `cancel` fires first (§4.4.1).
///
/// Firing the deadline does not simply drop `fut`: the caller threads
/// `cancel` down into every child operation (the Repo Guard lease, the
/// Gradle supervisor), so on timeout this fires `cancel` itself and then
/// keeps polling `fut` until it actually winds down. Dropping it instead
/// would detach whatever it had `tokio::spawn`'d (a dropped `JoinHandle`
/// does not abort the task) while releasing locks held in `fut`'s own
/// stack frame — exactly the kind of still-running-but-unguarded mutation
/// §4.4.1's "a running Gradle sub-process is terminated" rules out.
pub async fn run_with_deadline<Fut, T>(
    task_id: TaskId,
    deadline: Duration,
    cancel: CancellationToken,
    fut: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::pin!(fut);
    tokio::select! {
        result = &mut fut => result,
        _ = tokio::time::sleep(deadline) => {
            cancel.cancel();
            let _ = fut.await;
            Err(Error::Timeout(task_id))
        }
        _ = cancel.cancelled() => {
            let _ = fut.await;
            Err(Error::Cancelled(task_id))
        }
    }
}

/// Retries an at-least-once persistence write with capped exponential
/// backoff (§4.4.4): a status transition must eventually land even if the
/// store is briefly unavailable, since the Task Runtime is the only writer
/// for a given task and there is no one else to retry on its behalf.
pub async fn persist_with_retry<F, Fut, T>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    const MAX_ATTEMPTS: u32 = 5;
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < MAX_ATTEMPTS && is_retryable(&err) => {
                attempt += 1;
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt));
                warn!(attempt, backoff_ms = backoff.as_millis() as u64, error = %err, "retrying persistence write");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_retryable(err: &Error) -> bool {
    matches!(err, Error::Libsql(_) | Error::Unavailable(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn semaphore_bounds_concurrent_slots() {
        let runtime = Arc::new(TaskRuntime::new(1));
        let (_guard1, _cancel1) = runtime.acquire(TaskId(1)).await;
        assert_eq!(runtime.active_count().await, 1);

        let runtime2 = Arc::clone(&runtime);
        let second = tokio::spawn(async move { runtime2.acquire(TaskId(2)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());
        second.abort();
    }

    #[tokio::test]
    async fn progress_cannot_regress() {
        let runtime = Arc::new(TaskRuntime::new(3));
        let (_guard, _cancel) = runtime.acquire(TaskId(1)).await;
        runtime.observe_progress(TaskId(1), 40).await.expect("advance");
        let err = runtime.observe_progress(TaskId(1), 10).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn cancel_fires_token_for_running_task() {
        let runtime = Arc::new(TaskRuntime::new(3));
        let (_guard, cancel) = runtime.acquire(TaskId(1)).await;
        assert!(runtime.cancel(TaskId(1)).await);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn deadline_wins_over_slow_future() {
        let cancel = CancellationToken::new();
        let observed = cancel.clone();
        let fut_cancel = cancel.clone();
        let result = run_with_deadline(TaskId(1), Duration::from_millis(10), cancel, async move {
            // Mirrors how the real pipeline future is cancel-aware: it races
            // its own work against the token threaded in by the caller.
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(10)) => {}
                _ = fut_cancel.cancelled() => {}
            }
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(observed.is_cancelled(), "deadline must fire the cancellation token");
    }
}
