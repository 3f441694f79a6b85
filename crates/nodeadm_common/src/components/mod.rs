//! Installable node components.
//!
//! Each module exposes free `install` / `upgrade` / `uninstall` functions
//! that act on a [`Host`]. Tracker bookkeeping stays in the flows.

pub mod binary;
pub mod cni;
pub mod containerd;
pub mod iamra;
pub mod iptables;
pub mod kubelet;
pub mod ssm;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::host::Host;
use crate::platform::CredentialProvider;
use async_trait::async_trait;
use tokio::time::Instant;

/// A component that runs as a service and is brought up by `init`
#[async_trait]
pub trait Daemon: Send + Sync {
    /// Service unit name
    fn name(&self) -> &'static str;

    /// Write configuration files for this node
    async fn configure(&self, host: &Host, config: &NodeConfig, deadline: Instant) -> Result<()>;

    /// Runs once the service is up
    async fn post_launch(&self, _host: &Host, _config: &NodeConfig, _deadline: Instant) -> Result<()> {
        Ok(())
    }
}

/// Service name of the credential daemon for `provider`
pub fn credential_daemon_name(provider: CredentialProvider) -> &'static str {
    match provider {
        CredentialProvider::Ssm => ssm::DAEMON_NAME,
        CredentialProvider::IamRolesAnywhere => iamra::DAEMON_NAME,
    }
}

/// Daemons in start order: runtime, credentials, kubelet
pub fn node_daemons(provider: CredentialProvider) -> Vec<Box<dyn Daemon>> {
    let credentials: Box<dyn Daemon> = match provider {
        CredentialProvider::Ssm => Box::new(ssm::SsmDaemon),
        CredentialProvider::IamRolesAnywhere => Box::new(iamra::SigningHelperDaemon),
    };
    vec![
        Box::new(containerd::ContainerdDaemon),
        credentials,
        Box::new(kubelet::KubeletDaemon),
    ]
}
