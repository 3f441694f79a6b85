//! AWS Systems Manager credential provider.
//!
//! Install only places the setup CLI. Registration (which also installs the
//! agent package) happens at init, once per host: an existing registration
//! file means the node already has an identity and is left alone.

use super::binary::SSM_SETUP_CLI;
use super::Daemon;
use crate::artifact::{self, UpgradeOutcome};
use crate::command::CommandSpec;
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::paths;
use crate::retry;
use async_trait::async_trait;
use serde::Deserialize;
use std::fs;
use tokio::time::Instant;
use tracing::info;

pub const DAEMON_NAME: &str = "amazon-ssm-agent";
const AGENT_PACKAGE: &str = "amazon-ssm-agent";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Registration {
    #[serde(rename = "ManagedInstanceID")]
    managed_instance_id: String,
    #[serde(default)]
    region: String,
}

/// Managed instance id (`mi-...`) once the agent is registered
pub fn managed_instance_id(host: &Host) -> Result<Option<String>> {
    let path = host.path(paths::SSM_REGISTRATION_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(format!("read {}", path.display()), e)),
    };
    let registration: Registration = serde_json::from_str(&content)?;
    info!(
        parent: &host.log,
        instance_id = %registration.managed_instance_id,
        region = %registration.region,
        "Found SSM registration"
    );
    Ok(Some(registration.managed_instance_id))
}

pub async fn install(host: &Host) -> Result<()> {
    SSM_SETUP_CLI.install(host).await
}

pub async fn upgrade(host: &Host) -> Result<UpgradeOutcome> {
    SSM_SETUP_CLI.upgrade(host).await
}

/// Clear the local registration, remove the agent and everything it stored
pub async fn uninstall(host: &Host, deadline: Instant) -> Result<()> {
    if managed_instance_id(host)?.is_some() {
        let spec = CommandSpec::new("amazon-ssm-agent").args(["-register", "-clear"]);
        retry::retry_until_deadline("deregister ssm", host.backoff, deadline, &host.log, || {
            host.runner.run(&spec)
        })
        .await?;
    }

    host.packages
        .uninstall(&host.packages.package(AGENT_PACKAGE), deadline)
        .await?;

    artifact::remove_dir_all(&host.path(paths::SSM_DIR))?;
    artifact::remove_dir_all(&host.path(paths::SSM_DATA_DIR))
}

pub struct SsmDaemon;

#[async_trait]
impl Daemon for SsmDaemon {
    fn name(&self) -> &'static str {
        DAEMON_NAME
    }

    async fn configure(&self, host: &Host, config: &NodeConfig, deadline: Instant) -> Result<()> {
        if managed_instance_id(host)?.is_some() {
            info!(parent: &host.log, "Node already registered with SSM");
            return Ok(());
        }
        let ssm = config
            .spec
            .hybrid
            .ssm
            .as_ref()
            .ok_or_else(|| Error::config("spec.hybrid.ssm is required for the ssm credential provider"))?;

        let cli = host.path(paths::SSM_SETUP_CLI);
        if !cli.exists() {
            return Err(Error::precondition(format!(
                "{} is missing, run nodeadm install first",
                cli.display()
            )));
        }
        let spec = CommandSpec::new(cli.display().to_string()).args([
            "-register",
            "-activation-code",
            ssm.activation_code.as_str(),
            "-activation-id",
            ssm.activation_id.as_str(),
            "-region",
            config.spec.cluster.region.as_str(),
        ]);

        info!(parent: &host.log, region = %config.spec.cluster.region, "Registering with SSM");
        retry::retry_until_deadline("register ssm", host.backoff, deadline, &host.log, || {
            host.runner.run(&spec)
        })
        .await
        .map(|_| ())
    }
}
