//! Removal of everything the tracker lists.
//!
//! The tracker is saved after each removal, so an interrupted run can be
//! repeated and picks up where it stopped.

use crate::artifact;
use crate::components::{binary, cni, containerd, iamra, iptables, kubelet, ssm};
use crate::config::UninstallOptions;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::node::{self, NodeValidator};
use crate::paths;
use crate::platform::ContainerdSource;
use crate::tracker::{Component, Tracker};
use std::future::Future;
use tokio::time::Instant;
use tracing::info;

pub struct Uninstaller<'a> {
    host: &'a Host,
    validator: &'a dyn NodeValidator,
    options: UninstallOptions,
}

impl<'a> Uninstaller<'a> {
    pub fn new(host: &'a Host, validator: &'a dyn NodeValidator, options: UninstallOptions) -> Self {
        Self {
            host,
            validator,
            options,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let host = self.host;
        let deadline = Instant::now() + self.options.timeout;

        let mut tracker = match Tracker::get_installed_artifacts(&host.tracker_path()) {
            Ok(tracker) => tracker,
            Err(e) if e.is_not_found() => {
                info!(parent: &host.log, "Nothing installed, nothing to uninstall");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if tracker.is_installed(Component::Kubelet) {
            let node_name = kubelet::resolve_node_name(host, None)?;
            node::run_preflight(self.validator, &node_name, &self.options.skip, &host.log).await?;
        }

        self.stop_daemons(&tracker).await?;
        self.remove_components(&mut tracker, deadline).await?;

        // Shared directories several components write into
        for dir in [paths::EKS_DIR, paths::KUBERNETES_DIR, paths::AWS_HYBRID_DIR] {
            artifact::remove_dir_all(&host.path(dir))?;
        }
        host.daemons.daemon_reload().await?;

        tracker.clear()?;
        host.daemons.close().await;
        info!(parent: &host.log, "Uninstall complete");
        Ok(())
    }

    async fn stop_daemons(&self, tracker: &Tracker) -> Result<()> {
        let daemons = &self.host.daemons;
        let guarded = [
            (kubelet::DAEMON_NAME, tracker.is_installed(Component::Kubelet)),
            (ssm::DAEMON_NAME, tracker.is_installed(Component::Ssm)),
            (iamra::DAEMON_NAME, tracker.is_installed(Component::IamRolesAnywhere)),
            (containerd::DAEMON_NAME, tracker.manages_containerd()),
        ];
        for (name, installed) in guarded {
            if !installed {
                continue;
            }
            info!(parent: &self.host.log, daemon = name, "Stopping daemon");
            daemons
                .stop_daemon(name)
                .await
                .map_err(|e| Error::component("stop", name, e))?;
            daemons
                .disable_daemon(name)
                .await
                .map_err(|e| Error::component("disable", name, e))?;
        }
        Ok(())
    }

    async fn remove_components(&self, tracker: &mut Tracker, deadline: Instant) -> Result<()> {
        let host = self.host;

        if tracker.is_installed(Component::Kubelet) {
            self.step("kubelet", async { kubelet::uninstall(host) }).await?;
            Self::forget(tracker, Component::Kubelet)?;
        }
        if tracker.is_installed(Component::Kubectl) {
            self.step("kubectl", async { binary::KUBECTL.uninstall(host) })
                .await?;
            Self::forget(tracker, Component::Kubectl)?;
        }
        if tracker.is_installed(Component::CniPlugins) {
            self.step("cni-plugins", async { cni::uninstall(host) }).await?;
            Self::forget(tracker, Component::CniPlugins)?;
        }
        if tracker.is_installed(Component::EcrCredentialProvider) {
            self.step("ecr-credential-provider", async {
                binary::ECR_CREDENTIAL_PROVIDER.uninstall(host)
            })
            .await?;
            Self::forget(tracker, Component::EcrCredentialProvider)?;
        }
        if tracker.is_installed(Component::IamAuthenticator) {
            self.step("aws-iam-authenticator", async {
                binary::IAM_AUTHENTICATOR.uninstall(host)
            })
            .await?;
            Self::forget(tracker, Component::IamAuthenticator)?;
        }
        if tracker.is_installed(Component::Ssm) {
            self.step("ssm", ssm::uninstall(host, deadline)).await?;
            Self::forget(tracker, Component::Ssm)?;
        }
        if tracker.is_installed(Component::IamRolesAnywhere) {
            self.step("iam-roles-anywhere", async { iamra::uninstall(host) })
                .await?;
            Self::forget(tracker, Component::IamRolesAnywhere)?;
        }
        if tracker.is_installed(Component::Iptables) {
            self.step("iptables", iptables::uninstall(host, deadline))
                .await?;
            Self::forget(tracker, Component::Iptables)?;
        }

        let source = tracker.artifacts.containerd;
        if source != ContainerdSource::None {
            self.step("containerd", containerd::uninstall(host, source, deadline))
                .await?;
            tracker.mark_containerd(ContainerdSource::None);
            tracker.save()?;
        }
        // Repo files are only dropped once the runtime is gone
        if tracker.owns_docker_repo() {
            host.packages.cleanup(ContainerdSource::Docker)?;
            tracker.mark_docker_repo(false);
            tracker.save()?;
        }
        Ok(())
    }

    fn forget(tracker: &mut Tracker, component: Component) -> Result<()> {
        tracker.remove(component);
        tracker.save()
    }

    async fn step<F>(&self, component: &'static str, uninstall: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        info!(parent: &self.host.log, component, "Uninstalling");
        uninstall
            .await
            .map_err(|e| Error::component("uninstall", component, e))
    }
}
