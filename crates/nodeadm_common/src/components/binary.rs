//! Single-file components downloaded from the release manifest.

use crate::artifact::{self, Artifact, UpgradeOutcome, BINARY_MODE};
use crate::error::Result;
use crate::host::Host;
use crate::paths;
use tracing::info;

/// A manifest artifact installed as one executable
#[derive(Debug, Clone, Copy)]
pub struct Binary {
    pub artifact: Artifact,
    pub path: &'static str,
}

pub const KUBELET: Binary = Binary {
    artifact: Artifact::Kubelet,
    path: paths::KUBELET_BIN,
};

pub const KUBECTL: Binary = Binary {
    artifact: Artifact::Kubectl,
    path: paths::KUBECTL_BIN,
};

pub const ECR_CREDENTIAL_PROVIDER: Binary = Binary {
    artifact: Artifact::EcrCredentialProvider,
    path: paths::ECR_CREDENTIAL_PROVIDER_BIN,
};

pub const IAM_AUTHENTICATOR: Binary = Binary {
    artifact: Artifact::IamAuthenticator,
    path: paths::IAM_AUTHENTICATOR_BIN,
};

pub const SIGNING_HELPER: Binary = Binary {
    artifact: Artifact::SigningHelper,
    path: paths::SIGNING_HELPER_BIN,
};

pub const SSM_SETUP_CLI: Binary = Binary {
    artifact: Artifact::SsmSetupCli,
    path: paths::SSM_SETUP_CLI,
};

impl Binary {
    pub fn name(&self) -> &'static str {
        self.artifact.as_str()
    }

    /// Download and place the binary, replacing any earlier copy
    pub async fn install(&self, host: &Host) -> Result<()> {
        let mut source = host.fetcher.fetch(self.artifact).await?;
        let dest = host.path(self.path);
        artifact::install_verified(self.name(), &dest, source.as_mut(), BINARY_MODE)?;
        info!(parent: &host.log, component = self.name(), path = %dest.display(), "Installed");
        Ok(())
    }

    pub async fn upgrade(&self, host: &Host) -> Result<UpgradeOutcome> {
        let mut source = host.fetcher.fetch(self.artifact).await?;
        artifact::upgrade(
            self.name(),
            &host.path(self.path),
            source.as_mut(),
            BINARY_MODE,
            &host.log,
        )
    }

    pub fn uninstall(&self, host: &Host) -> Result<()> {
        artifact::remove_file(&host.path(self.path))
    }
}
