//! Gradle process supervision (§4.5.2).
//!
//! Gradle itself forks a daemon and worker processes; killing only the
//! `gradlew` child leaves those orphaned. Every process is launched in its
//! own process group so termination can target the whole tree at once.

use buildforge_core::error::Result;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Sentinel exit code meaning the run was cancelled before Gradle exited.
pub const CANCELLED_EXIT: i32 = i32::MIN;
/// Sentinel exit code meaning the inactivity watchdog fired.
pub const INACTIVE_EXIT: i32 = i32::MIN + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradleOutcome {
    pub exit_code: i32,
}

impl GradleOutcome {
    pub fn was_cancelled(self) -> bool {
        self.exit_code == CANCELLED_EXIT
    }

    pub fn was_inactive_timeout(self) -> bool {
        self.exit_code == INACTIVE_EXIT
    }

    pub fn succeeded(self) -> bool {
        self.exit_code == 0
    }
}

/// A single line of Gradle output, destined for the Log Bus.
pub struct GradleLine<'a> {
    pub text: &'a str,
    pub is_stderr: bool,
}

/// Abstraction over "run Gradle and stream its output", grounded the way a
/// `CommandRunner` abstraction separates subprocess execution from the
/// logic that interprets it — so the Build Pipeline can be tested without
/// an actual Gradle toolchain installed.
pub trait GradleRunner: Send + Sync {
    /// Runs `task_line` (e.g. `["clean", ":app:assembleRelease"]`) in
    /// `repo_path`, calling `on_line` for every line of output as it
    /// arrives. Returns as soon as the process exits, is cancelled via
    /// `cancel`, or goes `inactivity_timeout` without producing output.
    fn run<'a>(
        &'a self,
        repo_path: &'a Path,
        task_line: &'a [String],
        on_line: &'a mut (dyn FnMut(GradleLine<'_>) + Send),
        cancel: CancellationToken,
        inactivity_timeout: Duration,
    ) -> impl Future<Output = Result<GradleOutcome>> + Send + 'a;
}

/// Runs the project's `./gradlew` wrapper as a real child process.
pub struct TokioGradleRunner {
    pub kill_grace: Duration,
}

impl TokioGradleRunner {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }
}

impl GradleRunner for TokioGradleRunner {
    async fn run<'a>(
        &'a self,
        repo_path: &'a Path,
        task_line: &'a [String],
        on_line: &'a mut (dyn FnMut(GradleLine<'_>) + Send),
        cancel: CancellationToken,
        inactivity_timeout: Duration,
    ) -> Result<GradleOutcome> {
        let wrapper = if cfg!(windows) { "gradlew.bat" } else { "./gradlew" };

        let mut cmd = Command::new(wrapper);
        cmd.args(task_line)
            .current_dir(repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        loop {
            tokio::select! {
                line = stdout_lines.next_line() => {
                    match line? {
                        Some(text) => on_line(GradleLine { text: &text, is_stderr: false }),
                        None => {}
                    }
                }
                line = stderr_lines.next_line() => {
                    match line? {
                        Some(text) => on_line(GradleLine { text: &text, is_stderr: true }),
                        None => {}
                    }
                }
                status = child.wait() => {
                    let status = status?;
                    // The process has exited, but lines already buffered by the
                    // pipes may not have been read by a `select!` branch yet.
                    // Drain both streams to EOF before reporting the outcome, or
                    // the last lines of output (often the BUILD SUCCESSFUL /
                    // BUILD FAILED banner) can go missing.
                    while let Some(text) = stdout_lines.next_line().await? {
                        on_line(GradleLine { text: &text, is_stderr: false });
                    }
                    while let Some(text) = stderr_lines.next_line().await? {
                        on_line(GradleLine { text: &text, is_stderr: true });
                    }
                    return Ok(GradleOutcome { exit_code: status.code().unwrap_or(-1) });
                }
                _ = cancel.cancelled() => {
                    warn!(pid, "gradle cancelled, terminating process group");
                    self.terminate(pid).await;
                    return Ok(GradleOutcome { exit_code: CANCELLED_EXIT });
                }
                _ = tokio::time::sleep(inactivity_timeout) => {
                    warn!(pid, "gradle produced no output for the inactivity window, terminating");
                    self.terminate(pid).await;
                    return Ok(GradleOutcome { exit_code: INACTIVE_EXIT });
                }
            }
        }
    }
}

impl TokioGradleRunner {
    /// Sends `SIGTERM` to the process group, waits `kill_grace`, then
    /// `SIGKILL`s it if it hasn't exited (§4.5.2).
    #[cfg(unix)]
    async fn terminate(&self, pid: Option<u32>) {
        let Some(pid) = pid else { return };
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
        tokio::time::sleep(self.kill_grace).await;
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    async fn terminate(&self, _pid: Option<u32>) {}
}

/// Canned-output double for pipeline tests; plays back pre-recorded lines
/// and a fixed exit code without spawning anything.
pub struct FakeGradleRunner {
    pub lines: Vec<(String, bool)>,
    pub exit_code: i32,
}

impl GradleRunner for FakeGradleRunner {
    async fn run<'a>(
        &'a self,
        _repo_path: &'a Path,
        _task_line: &'a [String],
        on_line: &'a mut (dyn FnMut(GradleLine<'_>) + Send),
        _cancel: CancellationToken,
        _inactivity_timeout: Duration,
    ) -> Result<GradleOutcome> {
        for (text, is_stderr) in &self.lines {
            on_line(GradleLine { text, is_stderr: *is_stderr });
        }
        info!(exit_code = self.exit_code, "fake gradle run finished");
        Ok(GradleOutcome { exit_code: self.exit_code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_runner_replays_lines_in_order() {
        let runner = FakeGradleRunner {
            lines: vec![
                ("> Task :app:compileReleaseJavaWithJavac".into(), false),
                ("BUILD SUCCESSFUL".into(), false),
            ],
            exit_code: 0,
        };

        let mut seen = Vec::new();
        let outcome = runner
            .run(
                Path::new("/tmp"),
                &["assembleRelease".to_string()],
                &mut |line| seen.push(line.text.to_string()),
                CancellationToken::new(),
                Duration::from_secs(60),
            )
            .await
            .expect("run");

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(seen, vec!["> Task :app:compileReleaseJavaWithJavac", "BUILD SUCCESSFUL"]);
    }
}
