//! Configure and start the node daemons.

use crate::components::{self, Daemon};
use crate::config::NodeConfig;
use crate::daemon::{self, DaemonStatus, JobResult, RestartOptions};
use crate::error::{Error, Result};
use crate::host::Host;
use crate::tracker::Tracker;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::info;

pub struct Initializer<'a> {
    host: &'a Host,
    config: &'a NodeConfig,
}

impl<'a> Initializer<'a> {
    pub fn new(host: &'a Host, config: &'a NodeConfig) -> Self {
        Self { host, config }
    }

    /// Bring up containerd, the credential daemon and kubelet in that order
    pub async fn run(&self, deadline: Instant) -> Result<()> {
        let host = self.host;
        let tracker = Tracker::get_installed_artifacts(&host.tracker_path()).map_err(|e| {
            if e.is_not_found() {
                Error::precondition("no nodeadm installation found, run nodeadm install first")
            } else {
                e
            }
        })?;
        let requested = self.config.credential_provider();
        if let Some(installed) = tracker.credential_provider() {
            if installed != requested {
                return Err(Error::CredentialProviderMismatch {
                    installed: installed.to_string(),
                    requested: requested.to_string(),
                });
            }
        }

        let daemons = components::node_daemons(requested);
        for daemon in &daemons {
            self.launch(daemon.as_ref(), deadline)
                .await
                .map_err(|e| Error::component("init", daemon.name(), e))?;
        }
        for daemon in &daemons {
            daemon
                .post_launch(host, self.config, deadline)
                .await
                .map_err(|e| Error::component("init", daemon.name(), e))?;
        }

        info!(parent: &host.log, cluster = %self.config.spec.cluster.name, "Node initialized");
        Ok(())
    }

    async fn launch(&self, daemon: &dyn Daemon, deadline: Instant) -> Result<()> {
        let host = self.host;
        let name = daemon.name();
        info!(parent: &host.log, daemon = name, "Configuring daemon");

        daemon.configure(host, self.config, deadline).await?;
        daemon::retry_operation("enable", host.backoff, deadline, &host.log, || {
            host.daemons.enable_daemon(name)
        })
        .await?;
        host.daemons.daemon_reload().await?;

        let (tx, rx) = oneshot::channel();
        host.daemons
            .restart_daemon(name, RestartOptions::with_completion(tx))
            .await?;
        let job = tokio::time::timeout_at(deadline, rx)
            .await
            .map_err(|_| Error::Timeout(format!("restart of {}", name)))?
            .map_err(|_| Error::daemon(name, "restart job dropped without a result"))?;
        match job {
            JobResult::Done | JobResult::Skipped => {}
            other => return Err(Error::daemon(name, format!("restart job finished: {}", other))),
        }

        daemon::wait_for_status(
            host.daemons.as_ref(),
            name,
            DaemonStatus::Running,
            host.backoff,
            deadline,
            &host.log,
        )
        .await?;
        info!(parent: &host.log, daemon = name, "Daemon running");
        Ok(())
    }
}
