//! External command execution.
//!
//! Everything nodeadm shells out to (apt-get, yum, curl, ctr, kubectl, the SSM
//! setup CLI) goes through [`CommandRunner`] so flows can be exercised with
//! [`FakeRunner`] and no processes.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, Span};

/// Program plus arguments. Built fresh for every use, never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment; not part of the rendered command line
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A non-zero exit is an `Error::CommandFailed`.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands on the host
pub struct SystemRunner {
    log: Span,
}

impl SystemRunner {
    pub fn new(log: Span) -> Self {
        Self { log }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(parent: &self.log, command = %spec, "Executing");

        let output = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::io(format!("spawn {}", spec.program), e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: spec.to_string(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

// ============================================================================
// Fake Runner (Testing)
// ============================================================================

#[derive(Debug, Clone)]
enum FakeBehavior {
    /// Fail this many more times, then succeed
    FailTimes(u32),
    FailAlways,
    Stdout(String),
}

/// Records every command and answers from pre-configured rules.
///
/// Rules match when the rendered command line contains the pattern; the
/// first matching rule wins. Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct FakeRunner {
    rules: Mutex<Vec<(String, FakeBehavior)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_times(self, pattern: &str, times: u32) -> Self {
        self.set(pattern, FakeBehavior::FailTimes(times));
        self
    }

    pub fn fail_always(self, pattern: &str) -> Self {
        self.set(pattern, FakeBehavior::FailAlways);
        self
    }

    pub fn respond(self, pattern: &str, stdout: &str) -> Self {
        self.set(pattern, FakeBehavior::Stdout(stdout.to_string()));
        self
    }

    fn set(&self, pattern: &str, behavior: FakeBehavior) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push((pattern.to_string(), behavior));
        }
    }

    /// Every command line run so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_matching(&self, pattern: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let line = spec.to_string();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line.clone());
        }

        let failed = || Error::CommandFailed {
            command: line.clone(),
            status: "exit status: 1".to_string(),
            stderr: "fake failure".to_string(),
        };

        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Ok(CommandOutput::default()),
        };
        for (pattern, behavior) in rules.iter_mut() {
            if !line.contains(pattern.as_str()) {
                continue;
            }
            match behavior {
                FakeBehavior::FailTimes(0) => {}
                FakeBehavior::FailTimes(n) => {
                    *n -= 1;
                    return Err(failed());
                }
                FakeBehavior::FailAlways => return Err(failed()),
                FakeBehavior::Stdout(out) => {
                    return Ok(CommandOutput {
                        stdout: out.clone(),
                        stderr: String::new(),
                    })
                }
            }
        }

        Ok(CommandOutput::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_display() {
        let spec = CommandSpec::new("apt-get").args(["install", "-y", "iptables"]);
        assert_eq!(spec.to_string(), "apt-get install -y iptables");
    }

    #[tokio::test]
    async fn test_fake_runner_fails_then_succeeds() {
        let runner = FakeRunner::new().fail_times("install", 1);
        let spec = CommandSpec::new("yum").args(["install", "-y", "containerd"]);

        assert!(runner.run(&spec).await.is_err());
        assert!(runner.run(&spec).await.is_ok());
        assert_eq!(runner.calls_matching("containerd").len(), 2);
    }

    #[tokio::test]
    async fn test_system_runner_reports_non_zero_exit() {
        let runner = SystemRunner::new(Span::none());
        let err = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo boom >&2; exit 3"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
