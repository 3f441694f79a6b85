//! Init flow: daemon ordering and node files.

mod common;

use common::{iam_ra_config, position, read, release, ssm_config, Fixture, NODE_NAME};
use nodeadm_common::artifact::MemoryFetcher;
use nodeadm_common::command::FakeRunner;
use nodeadm_common::config::{InstallOptions, DEFAULT_TIMEOUT};
use nodeadm_common::daemon::{FakeDaemonManager, NoopManager};
use nodeadm_common::flows::{Initializer, Installer};
use nodeadm_common::host::Host;
use nodeadm_common::paths;
use nodeadm_common::platform::{ContainerdSource, CredentialProvider};
use nodeadm_common::Error;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::Instant;
use tracing::Span;

async fn install(root: &Path, provider: CredentialProvider) {
    let fx = Fixture::new(root, release("v1"));
    let options = InstallOptions {
        kubernetes_version: "1.31".to_string(),
        credential_provider: provider,
        containerd_source: ContainerdSource::Distro,
        timeout: DEFAULT_TIMEOUT,
    };
    Installer::new(&fx.host, options).run().await.unwrap();
}

#[tokio::test]
async fn test_init_starts_daemons_in_order() {
    let tmp = TempDir::new().unwrap();
    install(tmp.path(), CredentialProvider::Ssm).await;

    let fx = Fixture::new(tmp.path(), MemoryFetcher::new());
    let host = &fx.host;
    let config = ssm_config();

    Initializer::new(host, &config)
        .run(Instant::now() + DEFAULT_TIMEOUT)
        .await
        .unwrap();

    let ops = fx.daemons.ops();
    let containerd = position(&ops, "restart containerd");
    let ssm = position(&ops, "restart amazon-ssm-agent");
    let kubelet = position(&ops, "restart kubelet");
    assert!(containerd < ssm && ssm < kubelet, "{:?}", ops);
    assert!(position(&ops, "enable kubelet") < kubelet);
    for name in ["containerd", "amazon-ssm-agent", "kubelet"] {
        assert!(fx.daemons.is_running(name), "{} not running", name);
        assert!(fx.daemons.is_enabled(name), "{} not enabled", name);
    }

    // Registration before kubelet needs credentials; sandbox image pulled last
    let calls = fx.runner.calls();
    let register = position(&calls, "-register -activation-code code -activation-id id -region us-west-2");
    let pull = position(&calls, "image pull registry.k8s.io/pause:3.10");
    assert!(register < pull);

    assert_eq!(std::fs::read(host.path(paths::CLUSTER_CA)).unwrap(), b"-----BEGIN CERTIFICATE-----");
    assert!(read(host, paths::KUBELET_ENV).contains(&format!("--hostname-override={}", NODE_NAME)));
    assert!(read(host, paths::CONTAINERD_CONFIG).contains("registry.k8s.io/pause:3.10"));
    assert!(host.path(paths::KUBELET_KUBECONFIG).exists());
}

#[tokio::test]
async fn test_registered_node_is_not_registered_again() {
    let tmp = TempDir::new().unwrap();
    install(tmp.path(), CredentialProvider::Ssm).await;

    let fx = Fixture::new(tmp.path(), MemoryFetcher::new());
    let host = &fx.host;
    nodeadm_common::artifact::write_file(
        &host.path(paths::SSM_REGISTRATION_FILE),
        br#"{"ManagedInstanceID":"mi-0123456789abcdef0","Region":"us-west-2"}"#,
        nodeadm_common::artifact::CONFIG_MODE,
    )
    .unwrap();

    Initializer::new(host, &ssm_config())
        .run(Instant::now() + DEFAULT_TIMEOUT)
        .await
        .unwrap();

    assert!(fx.runner.calls_matching("-activation-code").is_empty());
    // The managed instance id outranks /etc/hostname
    assert!(read(host, paths::KUBELET_ENV).contains("--hostname-override=mi-0123456789abcdef0"));
}

#[tokio::test]
async fn test_iam_ra_init_runs_signing_helper() {
    let tmp = TempDir::new().unwrap();
    install(tmp.path(), CredentialProvider::IamRolesAnywhere).await;

    let fx = Fixture::new(tmp.path(), MemoryFetcher::new());
    let host = &fx.host;

    Initializer::new(host, &iam_ra_config())
        .run(Instant::now() + DEFAULT_TIMEOUT)
        .await
        .unwrap();

    assert!(fx.daemons.is_running("aws_signing_helper_update"));
    assert!(read(host, paths::SIGNING_HELPER_UNIT).contains("update"));
    assert!(read(host, paths::KUBELET_ENV).contains("AWS_SHARED_CREDENTIALS_FILE"));
}

#[tokio::test]
async fn test_init_before_install_fails() {
    let tmp = TempDir::new().unwrap();
    let fx = Fixture::new(tmp.path(), MemoryFetcher::new());

    let err = Initializer::new(&fx.host, &ssm_config())
        .run(Instant::now() + DEFAULT_TIMEOUT)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("nodeadm install"));
    assert!(fx.daemons.ops().is_empty());
}

#[tokio::test]
async fn test_init_with_other_provider_is_refused() {
    let tmp = TempDir::new().unwrap();
    install(tmp.path(), CredentialProvider::Ssm).await;

    let fx = Fixture::new(tmp.path(), MemoryFetcher::new());
    let err = Initializer::new(&fx.host, &iam_ra_config())
        .run(Instant::now() + DEFAULT_TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::CredentialProviderMismatch { .. }));
    assert!(fx.daemons.ops().is_empty());
}

#[tokio::test]
async fn test_failed_restart_aborts_init() {
    let tmp = TempDir::new().unwrap();
    install(tmp.path(), CredentialProvider::Ssm).await;

    let fx = Fixture::with(
        tmp.path(),
        FakeRunner::new(),
        FakeDaemonManager::new().fail_op_times("restart", 1),
        MemoryFetcher::new(),
    );
    let err = Initializer::new(&fx.host, &ssm_config())
        .run(Instant::now() + DEFAULT_TIMEOUT)
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("init containerd"), "{}", err);
    assert!(fx.daemons.ops().iter().all(|op| !op.contains("kubelet")));
    assert!(fx.runner.calls_matching("image pull").is_empty());
}

#[tokio::test]
async fn test_init_without_systemd_succeeds() {
    let tmp = TempDir::new().unwrap();
    install(tmp.path(), CredentialProvider::Ssm).await;

    let runner = Arc::new(FakeRunner::new());
    let host = Host::with_fakes(
        tmp.path(),
        runner.clone(),
        Arc::new(NoopManager::new(Span::none())),
        Arc::new(MemoryFetcher::new()),
    );

    Initializer::new(&host, &ssm_config())
        .run(Instant::now() + DEFAULT_TIMEOUT)
        .await
        .unwrap();

    assert!(host.path(paths::KUBELET_KUBECONFIG).exists());
    assert!(!runner.calls_matching("image pull").is_empty());
}
