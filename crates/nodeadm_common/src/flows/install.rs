//! Fresh install of every node component.

use crate::components::{binary, cni, containerd, iamra, iptables, kubelet, ssm};
use crate::config::InstallOptions;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::platform::{ContainerdSource, CredentialProvider};
use crate::tracker::{Component, Tracker};
use std::future::Future;
use tokio::time::Instant;
use tracing::info;

pub struct Installer<'a> {
    host: &'a Host,
    options: InstallOptions,
}

impl<'a> Installer<'a> {
    pub fn new(host: &'a Host, options: InstallOptions) -> Self {
        Self { host, options }
    }

    /// Install in dependency order, stopping at the first failure.
    ///
    /// The tracker is written once when the run ends, successful or not, and
    /// lists exactly the components that were installed.
    pub async fn run(&self) -> Result<()> {
        let deadline = Instant::now() + self.options.timeout;
        self.options
            .containerd_source
            .validate_for(self.host.os_info.os)?;

        let mut tracker = Tracker::get_current_state(&self.host.tracker_path())?;
        if let Some(installed) = tracker.credential_provider() {
            if installed != self.options.credential_provider {
                return Err(Error::CredentialProviderMismatch {
                    installed: installed.to_string(),
                    requested: self.options.credential_provider.to_string(),
                });
            }
        }

        info!(
            parent: &self.host.log,
            kubernetes_version = %self.options.kubernetes_version,
            credential_provider = %self.options.credential_provider,
            containerd_source = %self.options.containerd_source,
            "Installing node components"
        );

        let result = self.install_components(&mut tracker, deadline).await;
        tracker.save()?;
        result?;

        info!(parent: &self.host.log, "Install complete");
        Ok(())
    }

    async fn install_components(&self, tracker: &mut Tracker, deadline: Instant) -> Result<()> {
        let host = self.host;
        let mut source = self.options.containerd_source;
        if source != ContainerdSource::None
            && !tracker.manages_containerd()
            && containerd::runtime_present(host)
        {
            info!(
                parent: &host.log,
                containerd_source = %source,
                "containerd already present, leaving it unmanaged"
            );
            source = ContainerdSource::None;
        }

        // Marked up front: a partly configured repo still gets cleaned up
        if source == ContainerdSource::Docker {
            tracker.mark_docker_repo(true);
        }
        self.step("package-manager", host.packages.configure(source, deadline))
            .await?;

        if source != ContainerdSource::None {
            self.step("containerd", containerd::install(host, source, deadline))
                .await?;
            tracker.mark_containerd(source);
        }

        self.step("iptables", iptables::install(host, deadline)).await?;
        tracker.mark(Component::Iptables);

        match self.options.credential_provider {
            CredentialProvider::Ssm => {
                self.step("ssm", ssm::install(host)).await?;
                tracker.mark(Component::Ssm);
            }
            CredentialProvider::IamRolesAnywhere => {
                self.step("iam-roles-anywhere", iamra::install(host)).await?;
                tracker.mark(Component::IamRolesAnywhere);
            }
        }

        self.step("kubelet", kubelet::install(host)).await?;
        tracker.mark(Component::Kubelet);

        self.step("kubectl", binary::KUBECTL.install(host)).await?;
        tracker.mark(Component::Kubectl);

        self.step("cni-plugins", cni::install(host)).await?;
        tracker.mark(Component::CniPlugins);

        self.step(
            "ecr-credential-provider",
            binary::ECR_CREDENTIAL_PROVIDER.install(host),
        )
        .await?;
        tracker.mark(Component::EcrCredentialProvider);

        self.step(
            "aws-iam-authenticator",
            binary::IAM_AUTHENTICATOR.install(host),
        )
        .await?;
        tracker.mark(Component::IamAuthenticator);

        Ok(())
    }

    async fn step<F>(&self, component: &'static str, install: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        info!(parent: &self.host.log, component, "Installing");
        install
            .await
            .map_err(|e| Error::component("install", component, e))
    }
}
