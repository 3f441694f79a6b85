//! systemd through `systemctl`.

use super::{DaemonManager, DaemonStatus, JobResult, RestartOptions};
use crate::command::{CommandRunner, CommandSpec};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn, Span};

pub struct SystemdManager {
    runner: Arc<dyn CommandRunner>,
    log: Span,
}

/// `ActiveState` / `LoadState` pair from `systemctl show`
#[derive(Debug, Default, PartialEq, Eq)]
struct UnitState {
    active: String,
    load: String,
}

impl UnitState {
    fn parse(output: &str) -> Self {
        let mut state = UnitState::default();
        for line in output.lines() {
            match line.split_once('=') {
                Some(("ActiveState", v)) => state.active = v.trim().to_string(),
                Some(("LoadState", v)) => state.load = v.trim().to_string(),
                _ => {}
            }
        }
        state
    }

    fn exists(&self) -> bool {
        self.load != "not-found"
    }

    fn status(&self) -> DaemonStatus {
        if !self.exists() {
            return DaemonStatus::Stopped;
        }
        match self.active.as_str() {
            "active" | "activating" | "reloading" => DaemonStatus::Running,
            "inactive" | "failed" | "deactivating" => DaemonStatus::Stopped,
            _ => DaemonStatus::Unknown,
        }
    }
}

impl SystemdManager {
    pub fn new(runner: Arc<dyn CommandRunner>, log: Span) -> Self {
        Self { runner, log }
    }

    async fn systemctl(&self, args: &[&str]) -> Result<String> {
        let spec = CommandSpec::new("systemctl").args(args.iter().copied());
        let output = self.runner.run(&spec).await?;
        Ok(output.stdout)
    }

    async fn unit_state(&self, name: &str) -> Result<UnitState> {
        let out = self
            .systemctl(&["show", name, "--property=ActiveState,LoadState"])
            .await
            .map_err(|e| Error::daemon(name, e.to_string()))?;
        Ok(UnitState::parse(&out))
    }
}

#[async_trait]
impl DaemonManager for SystemdManager {
    async fn start_daemon(&self, name: &str) -> Result<()> {
        info!(parent: &self.log, daemon = name, "Starting daemon");
        self.systemctl(&["start", name]).await.map(|_| ())
    }

    async fn stop_daemon(&self, name: &str) -> Result<()> {
        let state = self.unit_state(name).await?;
        if state.status() == DaemonStatus::Stopped {
            info!(parent: &self.log, daemon = name, "Daemon already stopped");
            return Ok(());
        }
        info!(parent: &self.log, daemon = name, "Stopping daemon");
        self.systemctl(&["stop", name]).await.map(|_| ())
    }

    async fn restart_daemon(&self, name: &str, options: RestartOptions) -> Result<()> {
        let job_mode = format!("--job-mode={}", options.mode.as_str());
        let spec = CommandSpec::new("systemctl").args(["restart", job_mode.as_str(), name]);
        info!(parent: &self.log, daemon = name, "Restarting daemon");

        let Some(completion) = options.completion else {
            return self.runner.run(&spec).await.map(|_| ());
        };

        let runner = self.runner.clone();
        let log = self.log.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let result = match runner.run(&spec).await {
                Ok(_) => JobResult::Done,
                Err(e) => {
                    warn!(parent: &log, daemon = %name, error = %e, "Restart job failed");
                    JobResult::Failed
                }
            };
            // Receiver may have given up on the job
            let _ = completion.send(result);
        });
        Ok(())
    }

    async fn get_daemon_status(&self, name: &str) -> Result<DaemonStatus> {
        Ok(self.unit_state(name).await?.status())
    }

    async fn enable_daemon(&self, name: &str) -> Result<()> {
        self.systemctl(&["enable", name]).await.map(|_| ())
    }

    async fn disable_daemon(&self, name: &str) -> Result<()> {
        if !self.unit_state(name).await?.exists() {
            return Ok(());
        }
        self.systemctl(&["disable", name]).await.map(|_| ())
    }

    async fn daemon_reload(&self) -> Result<()> {
        self.systemctl(&["daemon-reload"]).await.map(|_| ())
    }

    async fn close(&self) {}
}
