//! In-place upgrade to a new Kubernetes version.

use super::init::Initializer;
use crate::components::{self, binary, cni, containerd, iamra, iptables, kubelet, ssm};
use crate::config::UpgradeOptions;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::node::{self, NodeValidator};
use crate::platform::{ContainerdSource, CredentialProvider};
use crate::tracker::{Component, InstalledArtifacts, Tracker};
use std::future::Future;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct Upgrader<'a> {
    host: &'a Host,
    validator: &'a dyn NodeValidator,
    options: UpgradeOptions,
}

impl<'a> Upgrader<'a> {
    pub fn new(host: &'a Host, validator: &'a dyn NodeValidator, options: UpgradeOptions) -> Self {
        Self {
            host,
            validator,
            options,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let host = self.host;
        let deadline = Instant::now() + self.options.timeout;

        let mut tracker = Tracker::get_installed_artifacts(&host.tracker_path()).map_err(|e| {
            if e.is_not_found() {
                Error::precondition("no nodeadm installation found, run nodeadm install first")
            } else {
                e
            }
        })?;

        // Must fail before anything on disk changes
        let requested = self.options.config.credential_provider();
        if let Some(installed) = tracker.credential_provider() {
            if installed != requested {
                return Err(Error::CredentialProviderMismatch {
                    installed: installed.to_string(),
                    requested: requested.to_string(),
                });
            }
        }

        let node_name = kubelet::resolve_node_name(host, Some(&self.options.config))?;
        node::run_preflight(self.validator, &node_name, &self.options.skip, &host.log).await?;

        info!(
            parent: &host.log,
            kubernetes_version = %self.options.kubernetes_version,
            "Upgrading node components"
        );

        for name in [
            kubelet::DAEMON_NAME,
            components::credential_daemon_name(requested),
        ] {
            host.daemons
                .stop_daemon(name)
                .await
                .map_err(|e| Error::component("stop", name, e))?;
        }

        let previous = tracker.artifacts.clone();
        tracker.clear()?;
        tracker.mark_docker_repo(previous.docker_repo);

        if let Err(e) = self.upgrade_components(&previous, &mut tracker, deadline).await {
            // Upgrades happen in place: whatever was installed still is
            warn!(parent: &host.log, error = %e, "Upgrade failed, restoring tracker");
            tracker.artifacts = previous;
            tracker.save()?;
            return Err(e);
        }
        tracker.save()?;

        Initializer::new(host, &self.options.config)
            .run(deadline)
            .await?;
        info!(parent: &host.log, "Upgrade complete");
        Ok(())
    }

    async fn upgrade_components(
        &self,
        previous: &InstalledArtifacts,
        tracker: &mut Tracker,
        deadline: Instant,
    ) -> Result<()> {
        let host = self.host;

        host.packages
            .refresh_metadata_cache(deadline)
            .await
            .map_err(|e| Error::component("upgrade", "package-manager", e))?;

        if previous.containerd != ContainerdSource::None {
            self.step("containerd", containerd::upgrade(host, previous.containerd, deadline))
                .await?;
        }
        tracker.mark_containerd(previous.containerd);

        if previous.iptables {
            self.step("iptables", iptables::upgrade(host, deadline)).await?;
            tracker.mark(Component::Iptables);
        }

        match self.options.config.credential_provider() {
            CredentialProvider::Ssm => {
                self.step("ssm", async { ssm::upgrade(host).await.map(|_| ()) })
                    .await?;
                tracker.mark(Component::Ssm);
            }
            CredentialProvider::IamRolesAnywhere => {
                self.step("iam-roles-anywhere", async {
                    iamra::upgrade(host).await.map(|_| ())
                })
                .await?;
                tracker.mark(Component::IamRolesAnywhere);
            }
        }

        if previous.kubelet {
            self.step("kubelet", async { kubelet::upgrade(host).await.map(|_| ()) })
                .await?;
            tracker.mark(Component::Kubelet);
        }

        for (installed, component, bin) in [
            (previous.kubectl, Component::Kubectl, binary::KUBECTL),
            (
                previous.ecr_credential_provider,
                Component::EcrCredentialProvider,
                binary::ECR_CREDENTIAL_PROVIDER,
            ),
            (
                previous.iam_authenticator,
                Component::IamAuthenticator,
                binary::IAM_AUTHENTICATOR,
            ),
        ] {
            if installed {
                self.step(bin.name(), async { bin.upgrade(host).await.map(|_| ()) })
                    .await?;
                tracker.mark(component);
            }
        }

        if previous.cni_plugins {
            self.step("cni-plugins", cni::install(host)).await?;
            tracker.mark(Component::CniPlugins);
        }
        Ok(())
    }

    async fn step<F>(&self, component: &'static str, upgrade: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        info!(parent: &self.host.log, component, "Upgrading");
        upgrade
            .await
            .map_err(|e| Error::component("upgrade", component, e))
    }
}
