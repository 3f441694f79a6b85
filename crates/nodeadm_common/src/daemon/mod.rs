//! OS service control.
//!
//! Every mutating operation is idempotent: stopping a stopped (or unknown)
//! unit and enabling an enabled one both succeed. Restarts can run as a
//! background job that reports on a oneshot channel.

mod fake;
mod noop;
mod systemd;

pub use fake::FakeDaemonManager;
pub use noop::NoopManager;
pub use systemd::SystemdManager;

use crate::command::CommandRunner;
use crate::error::{Error, Result};
use crate::retry;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Unknown,
    Stopped,
    Running,
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DaemonStatus::Unknown => "unknown",
            DaemonStatus::Stopped => "stopped",
            DaemonStatus::Running => "running",
        })
    }
}

/// How a queued job interacts with jobs already pending for the unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobMode {
    #[default]
    Replace,
    Fail,
    IgnoreDependencies,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::Replace => "replace",
            JobMode::Fail => "fail",
            JobMode::IgnoreDependencies => "ignore-dependencies",
        }
    }
}

/// Final state of a daemon job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    Done,
    Canceled,
    Timeout,
    Failed,
    Dependency,
    Skipped,
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobResult::Done => "done",
            JobResult::Canceled => "canceled",
            JobResult::Timeout => "timeout",
            JobResult::Failed => "failed",
            JobResult::Dependency => "dependency",
            JobResult::Skipped => "skipped",
        })
    }
}

#[derive(Debug, Default)]
pub struct RestartOptions {
    /// When set, the restart runs in the background and reports here
    pub completion: Option<oneshot::Sender<JobResult>>,
    pub mode: JobMode,
}

impl RestartOptions {
    pub fn with_completion(completion: oneshot::Sender<JobResult>) -> Self {
        Self {
            completion: Some(completion),
            mode: JobMode::Replace,
        }
    }
}

#[async_trait]
pub trait DaemonManager: Send + Sync {
    async fn start_daemon(&self, name: &str) -> Result<()>;

    async fn stop_daemon(&self, name: &str) -> Result<()>;

    async fn restart_daemon(&self, name: &str, options: RestartOptions) -> Result<()>;

    async fn get_daemon_status(&self, name: &str) -> Result<DaemonStatus>;

    async fn enable_daemon(&self, name: &str) -> Result<()>;

    async fn disable_daemon(&self, name: &str) -> Result<()>;

    /// Re-read unit files from disk
    async fn daemon_reload(&self) -> Result<()>;

    async fn close(&self);
}

/// systemd on Linux, a no-op manager everywhere else
pub fn new_daemon_manager(runner: Arc<dyn CommandRunner>, log: Span) -> Arc<dyn DaemonManager> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(SystemdManager::new(runner, log))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = runner;
        Arc::new(NoopManager::new(log))
    }
}

/// Poll until `name` reports `desired`.
///
/// Status errors count as "not yet". Fails with `Error::Timeout` once the
/// next poll would land past `deadline`.
pub async fn wait_for_status(
    manager: &dyn DaemonManager,
    name: &str,
    desired: DaemonStatus,
    backoff: Duration,
    deadline: Instant,
    log: &Span,
) -> Result<()> {
    loop {
        match manager.get_daemon_status(name).await {
            Ok(status) if status == desired => return Ok(()),
            Ok(status) => {
                debug!(parent: log, daemon = name, %status, %desired, "Waiting for daemon status")
            }
            Err(e) => debug!(parent: log, daemon = name, error = %e, "Daemon status failed"),
        }

        if Instant::now() + backoff > deadline {
            return Err(Error::Timeout(format!("{} to be {}", name, desired)));
        }
        tokio::time::sleep(backoff).await;
    }
}

/// Re-issue a daemon operation until it succeeds or the deadline passes
pub async fn retry_operation<F, Fut>(
    operation_name: &str,
    backoff: Duration,
    deadline: Instant,
    log: &Span,
    operation: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    retry::retry_until_deadline(operation_name, backoff, deadline, log, operation).await
}
