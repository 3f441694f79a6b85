//! Upgrade flow: in-place replacement followed by a fresh init.

mod common;

use common::{iam_ra_config, read, release, ssm_config, Fixture, NODE_NAME};
use nodeadm_common::artifact::{Artifact, MemoryFetcher};
use nodeadm_common::config::{InstallOptions, NodeConfig, UpgradeOptions, DEFAULT_TIMEOUT};
use nodeadm_common::flows::{Installer, Upgrader};
use nodeadm_common::host::Host;
use nodeadm_common::node::FakeNodeValidator;
use nodeadm_common::paths;
use nodeadm_common::platform::{ContainerdSource, CredentialProvider};
use nodeadm_common::tracker::Tracker;
use nodeadm_common::Error;
use std::collections::HashSet;
use std::path::Path;
use tempfile::TempDir;

async fn install(root: &Path) {
    let fx = Fixture::new(root, release("v1"));
    let options = InstallOptions {
        kubernetes_version: "1.30".to_string(),
        credential_provider: CredentialProvider::Ssm,
        containerd_source: ContainerdSource::Distro,
        timeout: DEFAULT_TIMEOUT,
    };
    Installer::new(&fx.host, options).run().await.unwrap();
}

fn options(host: &Host, config: NodeConfig) -> UpgradeOptions {
    UpgradeOptions {
        kubernetes_version: "1.31".to_string(),
        config,
        skip: HashSet::new(),
        timeout: DEFAULT_TIMEOUT,
    }
}

#[tokio::test]
async fn test_upgrade_replaces_binaries_and_restarts_node() {
    let tmp = TempDir::new().unwrap();
    install(tmp.path()).await;
    let before = Tracker::get_installed_artifacts(&Host::fake(tmp.path()).tracker_path())
        .unwrap()
        .artifacts;

    let fx = Fixture::new(tmp.path(), release("v2"));
    let host = &fx.host;
    let validator = FakeNodeValidator::new();

    Upgrader::new(host, &validator, options(host, ssm_config()))
        .run()
        .await
        .unwrap();

    assert_eq!(read(host, paths::KUBELET_BIN), "kubelet v2");
    assert_eq!(read(host, paths::KUBECTL_BIN), "kubectl v2");
    assert_eq!(read(host, paths::SSM_SETUP_CLI), "ssm-setup-cli v2");
    assert_eq!(
        std::fs::read(host.path(paths::CNI_BIN_DIR).join("bridge")).unwrap(),
        b"v2"
    );

    let after = Tracker::get_installed_artifacts(&host.tracker_path())
        .unwrap()
        .artifacts;
    assert_eq!(after, before);

    assert_eq!(
        validator.checks(),
        vec![format!("drained {}", NODE_NAME), format!("cordoned {}", NODE_NAME)]
    );

    let ops = fx.daemons.ops();
    assert_eq!(&ops[..2], ["stop kubelet", "stop amazon-ssm-agent"]);
    assert!(fx.daemons.is_running("kubelet"));
    assert!(fx.daemons.is_running("containerd"));
    assert!(!fx.runner.calls_matching("update").is_empty());
    assert!(!fx.runner.calls_matching("--only-upgrade -y containerd").is_empty());
}

#[tokio::test]
async fn test_credential_provider_change_touches_nothing() {
    let tmp = TempDir::new().unwrap();
    install(tmp.path()).await;

    let fx = Fixture::new(tmp.path(), release("v2"));
    let host = &fx.host;
    let validator = FakeNodeValidator::new();

    let err = Upgrader::new(host, &validator, options(host, iam_ra_config()))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::CredentialProviderMismatch { .. }));
    assert_eq!(read(host, paths::KUBELET_BIN), "kubelet v1");
    assert!(validator.checks().is_empty());
    assert!(fx.daemons.ops().is_empty());
    assert!(fx.runner.calls().is_empty());
    assert!(fx.fetcher.fetched().is_empty());
}

#[tokio::test]
async fn test_upgrade_without_install_fails() {
    let tmp = TempDir::new().unwrap();
    let fx = Fixture::new(tmp.path(), release("v2"));
    let host = &fx.host;

    let err = Upgrader::new(host, &FakeNodeValidator::new(), options(host, ssm_config()))
        .run()
        .await
        .unwrap_err();

    assert!(err.to_string().contains("nodeadm install"));
    assert!(fx.daemons.ops().is_empty());
}

#[tokio::test]
async fn test_failed_upgrade_keeps_tracker() {
    let tmp = TempDir::new().unwrap();
    install(tmp.path()).await;
    let before = Tracker::get_installed_artifacts(&Host::fake(tmp.path()).tracker_path())
        .unwrap()
        .artifacts;

    let fetcher = release("v2").with_bad_checksum(Artifact::Kubectl, b"tampered");
    let fx = Fixture::new(tmp.path(), fetcher);
    let host = &fx.host;

    let err = Upgrader::new(host, &FakeNodeValidator::new(), options(host, ssm_config()))
        .run()
        .await
        .unwrap_err();

    assert!(err.is_checksum());
    // kubelet went first, kubectl is untouched
    assert_eq!(read(host, paths::KUBELET_BIN), "kubelet v2");
    assert_eq!(read(host, paths::KUBECTL_BIN), "kubectl v1");
    let after = Tracker::get_installed_artifacts(&host.tracker_path())
        .unwrap()
        .artifacts;
    assert_eq!(after, before);
    assert!(!fx.daemons.is_running("kubelet"));
}

#[tokio::test]
async fn test_workloads_block_upgrade() {
    let tmp = TempDir::new().unwrap();
    install(tmp.path()).await;

    let fx = Fixture::new(tmp.path(), MemoryFetcher::new());
    let host = &fx.host;

    let result = Upgrader::new(
        host,
        &FakeNodeValidator::new().with_workloads(),
        options(host, ssm_config()),
    )
    .run()
    .await;

    assert!(result.is_err());
    assert!(fx.daemons.ops().is_empty());
    assert!(fx.fetcher.fetched().is_empty());
}
