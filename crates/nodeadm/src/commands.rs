//! Subcommand handlers: build a real [`Host`] and hand it to a flow.

use anyhow::{bail, Context, Result};
use nodeadm_common::artifact::{ArtifactFetcher, ManifestFetcher, MemoryFetcher};
use nodeadm_common::command::{CommandRunner, SystemRunner};
use nodeadm_common::config::{InstallOptions, NodeConfig, Skip, UninstallOptions, UpgradeOptions};
use nodeadm_common::daemon;
use nodeadm_common::flows::{Initializer, Installer, Uninstaller, Upgrader};
use nodeadm_common::host::Host;
use nodeadm_common::node::KubectlValidator;
use nodeadm_common::packagemanager::PackageManager;
use nodeadm_common::paths;
use nodeadm_common::platform::{Arch, ContainerdSource, CredentialProvider, OsInfo};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info_span, Span};

const ROOT: &str = "/";

pub fn require_root() -> Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        bail!("nodeadm must run as root");
    }
    Ok(())
}

/// Fetcher for flows that only touch what is already installed
enum Fetch {
    Manifest { url: String, kubernetes_version: String },
    Offline,
}

async fn build_host(fetch: Fetch, log: Span) -> Result<Host> {
    let root = PathBuf::from(ROOT);
    let os_info = OsInfo::detect(&root).context("detect operating system")?;
    let arch = Arch::current()?;
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(log.clone()));
    let daemons = daemon::new_daemon_manager(runner.clone(), log.clone());
    let packages = PackageManager::detect(os_info.clone(), arch, &root, runner.clone(), log.clone())?;

    let fetcher: Arc<dyn ArtifactFetcher> = match fetch {
        Fetch::Manifest {
            url,
            kubernetes_version,
        } => Arc::new(
            ManifestFetcher::load(&url, &kubernetes_version, arch, log.clone())
                .await
                .context("load release manifest")?,
        ),
        Fetch::Offline => Arc::new(MemoryFetcher::new()),
    };

    Ok(Host::new(
        root, os_info, arch, runner, daemons, fetcher, packages, log,
    ))
}

fn validator(host: &Host) -> KubectlValidator {
    KubectlValidator::new(
        host.runner.clone(),
        host.path(paths::KUBECTL_BIN),
        host.path(paths::KUBELET_KUBECONFIG),
    )
}

fn load_config(path: &Path) -> Result<NodeConfig> {
    NodeConfig::load(path).with_context(|| format!("load node config {}", path.display()))
}

/// Run a flow under the overall deadline
async fn bounded<F>(timeout: Duration, flow: F) -> Result<()>
where
    F: Future<Output = nodeadm_common::Result<()>>,
{
    match tokio::time::timeout(timeout, flow).await {
        Ok(result) => Ok(result?),
        Err(_) => bail!("timed out after {}s", timeout.as_secs()),
    }
}

pub async fn install(
    kubernetes_version: String,
    credential_provider: CredentialProvider,
    containerd_source: ContainerdSource,
    manifest_url: String,
    timeout: Duration,
) -> Result<()> {
    let log = info_span!("install", kubernetes_version = %kubernetes_version);
    let host = build_host(
        Fetch::Manifest {
            url: manifest_url,
            kubernetes_version: kubernetes_version.clone(),
        },
        log,
    )
    .await?;

    let options = InstallOptions {
        kubernetes_version,
        credential_provider,
        containerd_source,
        timeout,
    };
    bounded(timeout, Installer::new(&host, options).run()).await
}

pub async fn uninstall(skip: Vec<Skip>, timeout: Duration) -> Result<()> {
    let host = build_host(Fetch::Offline, info_span!("uninstall")).await?;
    let validator = validator(&host);

    let options = UninstallOptions {
        skip: skip.into_iter().collect(),
        timeout,
    };
    bounded(timeout, Uninstaller::new(&host, &validator, options).run()).await
}

pub async fn upgrade(
    kubernetes_version: String,
    config_source: PathBuf,
    skip: Vec<Skip>,
    manifest_url: String,
    timeout: Duration,
) -> Result<()> {
    let config = load_config(&config_source)?;
    let log = info_span!("upgrade", kubernetes_version = %kubernetes_version);
    let host = build_host(
        Fetch::Manifest {
            url: manifest_url,
            kubernetes_version: kubernetes_version.clone(),
        },
        log,
    )
    .await?;
    let validator = validator(&host);

    let options = UpgradeOptions {
        kubernetes_version,
        config,
        skip: skip.into_iter().collect(),
        timeout,
    };
    bounded(timeout, Upgrader::new(&host, &validator, options).run()).await
}

pub async fn init(config_source: PathBuf, timeout: Duration) -> Result<()> {
    let config = load_config(&config_source)?;
    let host = build_host(Fetch::Offline, info_span!("init")).await?;

    let deadline = tokio::time::Instant::now() + timeout;
    bounded(timeout, Initializer::new(&host, &config).run(deadline)).await
}
