//! Container runtime.
//!
//! Installed from the distro or docker repository. With source `none` the
//! runtime already on the host is used as-is and never touched.

use super::Daemon;
use crate::artifact::{self, CONFIG_MODE};
use crate::command::CommandSpec;
use crate::config::NodeConfig;
use crate::error::Result;
use crate::host::Host;
use crate::paths;
use crate::platform::ContainerdSource;
use crate::retry;
use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

pub const DAEMON_NAME: &str = "containerd";

/// A containerd binary is already on the host
pub fn runtime_present(host: &Host) -> bool {
    paths::CONTAINERD_BINS
        .iter()
        .any(|bin| host.path(bin).is_file())
}

pub async fn install(host: &Host, source: ContainerdSource, deadline: Instant) -> Result<()> {
    let Some(package) = host.packages.containerd_package(source) else {
        info!(parent: &host.log, "Using containerd already present on the host");
        return Ok(());
    };
    host.packages.install(&package, deadline).await
}

pub async fn upgrade(host: &Host, source: ContainerdSource, deadline: Instant) -> Result<()> {
    match host.packages.containerd_package(source) {
        Some(package) => host.packages.upgrade(&package, deadline).await,
        None => Ok(()),
    }
}

pub async fn uninstall(host: &Host, source: ContainerdSource, deadline: Instant) -> Result<()> {
    if let Some(package) = host.packages.containerd_package(source) {
        host.packages.uninstall(&package, deadline).await?;
    }
    artifact::remove_file(&host.path(paths::CONTAINERD_CONFIG))
}

#[derive(Debug, Serialize)]
struct ContainerdConfig {
    version: u32,
    plugins: Plugins,
}

#[derive(Debug, Serialize)]
struct Plugins {
    #[serde(rename = "io.containerd.grpc.v1.cri")]
    cri: CriPlugin,
}

#[derive(Debug, Serialize)]
struct CriPlugin {
    sandbox_image: String,
    containerd: CriContainerd,
}

#[derive(Debug, Serialize)]
struct CriContainerd {
    default_runtime_name: String,
    runtimes: Runtimes,
}

#[derive(Debug, Serialize)]
struct Runtimes {
    runc: Runtime,
}

#[derive(Debug, Serialize)]
struct Runtime {
    runtime_type: String,
    options: RuncOptions,
}

#[derive(Debug, Serialize)]
struct RuncOptions {
    #[serde(rename = "SystemdCgroup")]
    systemd_cgroup: bool,
}

fn render_config(sandbox_image: &str) -> Result<String> {
    let config = ContainerdConfig {
        version: 2,
        plugins: Plugins {
            cri: CriPlugin {
                sandbox_image: sandbox_image.to_string(),
                containerd: CriContainerd {
                    default_runtime_name: "runc".to_string(),
                    runtimes: Runtimes {
                        runc: Runtime {
                            runtime_type: "io.containerd.runc.v2".to_string(),
                            options: RuncOptions {
                                systemd_cgroup: true,
                            },
                        },
                    },
                },
            },
        },
    };
    Ok(toml::to_string(&config)?)
}

pub struct ContainerdDaemon;

#[async_trait]
impl Daemon for ContainerdDaemon {
    fn name(&self) -> &'static str {
        DAEMON_NAME
    }

    async fn configure(&self, host: &Host, config: &NodeConfig, _deadline: Instant) -> Result<()> {
        let content = render_config(config.sandbox_image())?;
        artifact::write_file(&host.path(paths::CONTAINERD_CONFIG), content.as_bytes(), CONFIG_MODE)
    }

    /// Pre-pull the sandbox image so the first pod does not wait on it
    async fn post_launch(&self, host: &Host, config: &NodeConfig, deadline: Instant) -> Result<()> {
        let image = config.sandbox_image();
        let spec = CommandSpec::new("ctr").args(["--namespace", "k8s.io", "image", "pull", image]);
        info!(parent: &host.log, image, "Caching sandbox image");
        retry::retry_until_deadline("pull sandbox image", host.backoff, deadline, &host.log, || {
            host.runner.run(&spec)
        })
        .await
        .map(|_| ())
    }
}
