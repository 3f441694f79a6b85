//! IAM Roles Anywhere credential provider.
//!
//! The signing helper runs in `update` mode under its own unit and keeps a
//! shared credentials file fresh for kubelet and the IAM authenticator.

use super::binary::SIGNING_HELPER;
use super::Daemon;
use crate::artifact::{self, UpgradeOutcome, CONFIG_MODE};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::paths;
use async_trait::async_trait;
use tokio::time::Instant;

pub const DAEMON_NAME: &str = "aws_signing_helper_update";

/// Credential lifetime requested from IAM Roles Anywhere, in seconds
const SESSION_DURATION: u32 = 900;

pub async fn install(host: &Host) -> Result<()> {
    SIGNING_HELPER.install(host).await
}

pub async fn upgrade(host: &Host) -> Result<UpgradeOutcome> {
    SIGNING_HELPER.upgrade(host).await
}

pub fn uninstall(host: &Host) -> Result<()> {
    SIGNING_HELPER.uninstall(host)?;
    artifact::remove_file(&host.path(paths::SIGNING_HELPER_UNIT))?;
    artifact::remove_dir_all(&host.path(paths::AWS_HYBRID_DIR))?;
    artifact::remove_file(&host.path(paths::AWS_CREDENTIALS_FILE))
}

fn render_unit(config: &NodeConfig, node_name: &str) -> Result<String> {
    let ira = config.spec.hybrid.iam_roles_anywhere.as_ref().ok_or_else(|| {
        Error::config("spec.hybrid.iamRolesAnywhere is required for the iam-ra credential provider")
    })?;

    Ok(format!(
        "[Unit]
Description=Refresh AWS credentials with IAM Roles Anywhere
After=network-online.target
Wants=network-online.target

[Service]
Environment=AWS_SHARED_CREDENTIALS_FILE={credentials}
ExecStart={helper} update \\
    --certificate {certificate} \\
    --private-key {private_key} \\
    --trust-anchor-arn {trust_anchor} \\
    --profile-arn {profile} \\
    --role-arn {role} \\
    --region {region} \\
    --session-duration {duration} \\
    --role-session-name {node_name}
Restart=always
RestartSec=5

[Install]
WantedBy=multi-user.target
",
        credentials = paths::AWS_CREDENTIALS_FILE,
        helper = paths::SIGNING_HELPER_BIN,
        certificate = ira.certificate_path.display(),
        private_key = ira.private_key_path.display(),
        trust_anchor = ira.trust_anchor_arn,
        profile = ira.profile_arn,
        role = ira.role_arn,
        region = config.spec.cluster.region,
        duration = SESSION_DURATION,
        node_name = node_name,
    ))
}

fn render_aws_config(config: &NodeConfig) -> String {
    format!("[default]\nregion = {}\n", config.spec.cluster.region)
}

pub struct SigningHelperDaemon;

#[async_trait]
impl Daemon for SigningHelperDaemon {
    fn name(&self) -> &'static str {
        DAEMON_NAME
    }

    async fn configure(&self, host: &Host, config: &NodeConfig, _deadline: Instant) -> Result<()> {
        let node_name = config
            .spec
            .hybrid
            .node_name
            .as_deref()
            .ok_or_else(|| Error::config("spec.hybrid.nodeName is required with iamRolesAnywhere"))?;

        let unit = render_unit(config, node_name)?;
        artifact::write_file(&host.path(paths::SIGNING_HELPER_UNIT), unit.as_bytes(), CONFIG_MODE)?;
        artifact::write_file(
            &host.path(paths::AWS_CONFIG_FILE),
            render_aws_config(config).as_bytes(),
            CONFIG_MODE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_carries_role_and_session_name() {
        let config = NodeConfig::parse(
            r#"
apiVersion: node.eks.aws/v1alpha1
kind: NodeConfig
spec:
  cluster:
    name: c
    region: ap-south-1
  hybrid:
    nodeName: rack-3-node-7
    iamRolesAnywhere:
      trustAnchorArn: arn:ta
      profileArn: arn:profile
      roleArn: arn:role
      certificatePath: /etc/iam/pki/server.pem
      privateKeyPath: /etc/iam/pki/server.key
"#,
        )
        .unwrap();

        let unit = render_unit(&config, "rack-3-node-7").unwrap();
        assert!(unit.contains("--role-arn arn:role"));
        assert!(unit.contains("--role-session-name rack-3-node-7"));
        assert!(unit.contains("--region ap-south-1"));
        assert!(unit.contains("ExecStart=/usr/local/bin/aws_signing_helper update"));
        assert_eq!(render_aws_config(&config), "[default]\nregion = ap-south-1\n");
    }
}
