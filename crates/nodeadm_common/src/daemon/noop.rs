//! Fallback for hosts without systemd.

use super::{DaemonManager, DaemonStatus, JobResult, RestartOptions};
use crate::error::Result;
use async_trait::async_trait;
use tracing::{debug, Span};

/// Accepts every operation and reports every daemon as running
pub struct NoopManager {
    log: Span,
}

impl NoopManager {
    pub fn new(log: Span) -> Self {
        Self { log }
    }
}

#[async_trait]
impl DaemonManager for NoopManager {
    async fn start_daemon(&self, name: &str) -> Result<()> {
        debug!(parent: &self.log, daemon = name, "start (noop)");
        Ok(())
    }

    async fn stop_daemon(&self, name: &str) -> Result<()> {
        debug!(parent: &self.log, daemon = name, "stop (noop)");
        Ok(())
    }

    async fn restart_daemon(&self, name: &str, options: RestartOptions) -> Result<()> {
        debug!(parent: &self.log, daemon = name, "restart (noop)");
        if let Some(completion) = options.completion {
            let _ = completion.send(JobResult::Skipped);
        }
        Ok(())
    }

    async fn get_daemon_status(&self, _name: &str) -> Result<DaemonStatus> {
        Ok(DaemonStatus::Running)
    }

    async fn enable_daemon(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn disable_daemon(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn daemon_reload(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_restart_reports_skipped_and_running() {
        let manager = NoopManager::new(Span::none());
        let (tx, rx) = tokio::sync::oneshot::channel();
        manager
            .restart_daemon("containerd", RestartOptions::with_completion(tx))
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), JobResult::Skipped);
        assert_eq!(
            manager.get_daemon_status("containerd").await.unwrap(),
            DaemonStatus::Running
        );
    }
}
