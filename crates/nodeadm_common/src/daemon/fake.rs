//! In-memory daemon manager for tests.

use super::{DaemonManager, DaemonStatus, JobResult, RestartOptions};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default)]
struct Unit {
    running: bool,
    enabled: bool,
}

#[derive(Default)]
struct State {
    units: HashMap<String, Unit>,
    ops: Vec<String>,
    status_failures: HashMap<String, u32>,
    op_failures: HashMap<String, u32>,
    reloads: u32,
    closed: bool,
}

/// Records every call as `"<op> <name>"` and keeps per-unit state.
///
/// Units that were never started report `Stopped`.
#[derive(Default)]
pub struct FakeDaemonManager {
    state: Mutex<State>,
}

impl FakeDaemonManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `name` already running
    pub fn with_running(self, name: &str) -> Self {
        self.update(|s| {
            s.units.entry(name.to_string()).or_default().running = true;
        });
        self
    }

    /// `get_daemon_status(name)` errors this many times
    pub fn fail_status_times(self, name: &str, times: u32) -> Self {
        self.update(|s| {
            s.status_failures.insert(name.to_string(), times);
        });
        self
    }

    /// Operation `op` ("start", "enable", ...) errors this many times
    pub fn fail_op_times(self, op: &str, times: u32) -> Self {
        self.update(|s| {
            s.op_failures.insert(op.to_string(), times);
        });
        self
    }

    fn update<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn record(&self, op: &str, name: &str) -> Result<()> {
        self.update(|s| {
            s.ops.push(format!("{} {}", op, name));
            match s.op_failures.get_mut(op) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    Err(Error::daemon(name, format!("fake {} failure", op)))
                }
                _ => Ok(()),
            }
        })
    }

    /// Every operation issued so far, e.g. `["stop kubelet", "enable kubelet"]`
    pub fn ops(&self) -> Vec<String> {
        self.update(|s| s.ops.clone())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.update(|s| s.units.get(name).map(|u| u.running).unwrap_or(false))
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.update(|s| s.units.get(name).map(|u| u.enabled).unwrap_or(false))
    }

    pub fn reloads(&self) -> u32 {
        self.update(|s| s.reloads)
    }

    pub fn is_closed(&self) -> bool {
        self.update(|s| s.closed)
    }
}

#[async_trait]
impl DaemonManager for FakeDaemonManager {
    async fn start_daemon(&self, name: &str) -> Result<()> {
        self.record("start", name)?;
        self.update(|s| s.units.entry(name.to_string()).or_default().running = true);
        Ok(())
    }

    async fn stop_daemon(&self, name: &str) -> Result<()> {
        self.record("stop", name)?;
        self.update(|s| {
            if let Some(unit) = s.units.get_mut(name) {
                unit.running = false;
            }
        });
        Ok(())
    }

    async fn restart_daemon(&self, name: &str, options: RestartOptions) -> Result<()> {
        let result = self.record("restart", name);
        if result.is_ok() {
            self.update(|s| s.units.entry(name.to_string()).or_default().running = true);
        }
        match options.completion {
            Some(completion) => {
                let job = if result.is_ok() {
                    JobResult::Done
                } else {
                    JobResult::Failed
                };
                let _ = completion.send(job);
                Ok(())
            }
            None => result,
        }
    }

    async fn get_daemon_status(&self, name: &str) -> Result<DaemonStatus> {
        self.update(|s| {
            if let Some(n) = s.status_failures.get_mut(name) {
                if *n > 0 {
                    *n -= 1;
                    return Err(Error::daemon(name, "fake status failure"));
                }
            }
            let running = s.units.get(name).map(|u| u.running).unwrap_or(false);
            Ok(if running {
                DaemonStatus::Running
            } else {
                DaemonStatus::Stopped
            })
        })
    }

    async fn enable_daemon(&self, name: &str) -> Result<()> {
        self.record("enable", name)?;
        self.update(|s| s.units.entry(name.to_string()).or_default().enabled = true);
        Ok(())
    }

    async fn disable_daemon(&self, name: &str) -> Result<()> {
        self.record("disable", name)?;
        self.update(|s| {
            if let Some(unit) = s.units.get_mut(name) {
                unit.enabled = false;
            }
        });
        Ok(())
    }

    async fn daemon_reload(&self) -> Result<()> {
        self.record("daemon-reload", "")?;
        self.update(|s| s.reloads += 1);
        Ok(())
    }

    async fn close(&self) {
        self.update(|s| s.closed = true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_never_started_is_ok() {
        let manager = FakeDaemonManager::new();
        manager.stop_daemon("kubelet").await.unwrap();
        manager.stop_daemon("kubelet").await.unwrap();
        assert_eq!(
            manager.get_daemon_status("kubelet").await.unwrap(),
            DaemonStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_restart_failure_reported_on_channel() {
        let manager = FakeDaemonManager::new().fail_op_times("restart", 1);
        let (tx, rx) = tokio::sync::oneshot::channel();
        manager
            .restart_daemon("containerd", RestartOptions::with_completion(tx))
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), JobResult::Failed);
        assert!(!manager.is_running("containerd"));
    }
}
