//! Distro package manager (apt / yum).
//!
//! Every shell-out is retried with a fixed backoff until the flow deadline:
//! on a freshly booted host cloud-init or unattended-upgrades routinely hold
//! the package lock for minutes.

use crate::artifact::{self, CONFIG_MODE};
use crate::command::{CommandRunner, CommandSpec};
use crate::error::{Error, Result};
use crate::paths;
use crate::platform::{Arch, ContainerdSource, Os, OsInfo};
use crate::retry::{self, DEFAULT_BACKOFF};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, Span};

const DOCKER_DOWNLOAD_URL: &str = "https://download.docker.com/linux";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerKind {
    Apt,
    Yum,
}

impl ManagerKind {
    /// First of `apt-get`, `yum` found on PATH
    pub fn detect() -> Result<Self> {
        if which::which("apt-get").is_ok() {
            Ok(ManagerKind::Apt)
        } else if which::which("yum").is_ok() {
            Ok(ManagerKind::Yum)
        } else {
            Err(Error::unsupported("no supported package manager (apt-get, yum) found"))
        }
    }

    fn program(&self) -> &'static str {
        match self {
            ManagerKind::Apt => "apt-get",
            ManagerKind::Yum => "yum",
        }
    }

    fn command(&self) -> CommandSpec {
        let spec = CommandSpec::new(self.program());
        match self {
            ManagerKind::Apt => spec.env("DEBIAN_FRONTEND", "noninteractive"),
            ManagerKind::Yum => spec,
        }
    }
}

impl fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// A package with its three operations. Each call builds a fresh command.
pub trait Package: Send + Sync {
    fn name(&self) -> &str;

    fn install_cmd(&self) -> CommandSpec;

    fn uninstall_cmd(&self) -> CommandSpec;

    fn upgrade_cmd(&self) -> CommandSpec;
}

#[derive(Debug, Clone)]
pub struct DistroPackage {
    name: String,
    kind: ManagerKind,
}

impl DistroPackage {
    pub fn new(name: impl Into<String>, kind: ManagerKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl Package for DistroPackage {
    fn name(&self) -> &str {
        &self.name
    }

    fn install_cmd(&self) -> CommandSpec {
        self.kind
            .command()
            .args(["install", "-y", self.name.as_str()])
    }

    fn uninstall_cmd(&self) -> CommandSpec {
        match self.kind {
            ManagerKind::Apt => self
                .kind
                .command()
                .args(["remove", "--purge", "-y", self.name.as_str()]),
            ManagerKind::Yum => self.kind.command().args(["remove", "-y", self.name.as_str()]),
        }
    }

    fn upgrade_cmd(&self) -> CommandSpec {
        match self.kind {
            ManagerKind::Apt => self
                .kind
                .command()
                .args(["install", "--only-upgrade", "-y", self.name.as_str()]),
            ManagerKind::Yum => self.kind.command().args(["update", "-y", self.name.as_str()]),
        }
    }
}

pub struct PackageManager {
    kind: ManagerKind,
    os_info: OsInfo,
    arch: Arch,
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    backoff: Duration,
    log: Span,
}

impl PackageManager {
    pub fn new(
        kind: ManagerKind,
        os_info: OsInfo,
        arch: Arch,
        root: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        log: Span,
    ) -> Self {
        Self {
            kind,
            os_info,
            arch,
            root: root.into(),
            runner,
            backoff: DEFAULT_BACKOFF,
            log,
        }
    }

    /// Probe PATH for the host package manager
    pub fn detect(
        os_info: OsInfo,
        arch: Arch,
        root: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        log: Span,
    ) -> Result<Self> {
        let kind = ManagerKind::detect()?;
        info!(parent: &log, package_manager = %kind, "Detected package manager");
        Ok(Self::new(kind, os_info, arch, root, runner, log))
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn kind(&self) -> ManagerKind {
        self.kind
    }

    pub fn package(&self, name: &str) -> DistroPackage {
        DistroPackage::new(name, self.kind)
    }

    /// containerd package for `source`; `None` means nodeadm does not own the runtime
    pub fn containerd_package(&self, source: ContainerdSource) -> Option<DistroPackage> {
        match source {
            ContainerdSource::None => None,
            ContainerdSource::Distro => Some(self.package("containerd")),
            ContainerdSource::Docker => Some(self.package("containerd.io")),
        }
    }

    pub fn iptables_package(&self) -> DistroPackage {
        self.package("iptables")
    }

    /// Provision third-party repositories needed by `source`
    pub async fn configure(&self, source: ContainerdSource, deadline: Instant) -> Result<()> {
        if source != ContainerdSource::Docker {
            return Ok(());
        }
        info!(parent: &self.log, package_manager = %self.kind, "Configuring docker repository");

        match self.kind {
            ManagerKind::Yum => {
                // runc from the distro conflicts with containerd.io
                self.run(self.package("runc").uninstall_cmd(), deadline).await?;
                self.run(self.package("yum-utils").install_cmd(), deadline)
                    .await?;
                let repo = format!("{}/{}/docker-ce.repo", DOCKER_DOWNLOAD_URL, self.docker_distro());
                self.run(
                    CommandSpec::new("yum-config-manager").args(["--add-repo", repo.as_str()]),
                    deadline,
                )
                .await
            }
            ManagerKind::Apt => {
                self.run(self.package("ca-certificates").install_cmd(), deadline)
                    .await?;

                let key = paths::rooted(&self.root, paths::DOCKER_APT_KEY);
                if let Some(dir) = key.parent() {
                    artifact::make_dirs(dir)?;
                }
                let key_url = format!("{}/{}/gpg", DOCKER_DOWNLOAD_URL, self.docker_distro());
                let key_path = key.display().to_string();
                self.run(
                    CommandSpec::new("curl").args(["-fsSL", key_url.as_str(), "-o", key_path.as_str()]),
                    deadline,
                )
                .await?;

                let list = paths::rooted(&self.root, paths::DOCKER_APT_SOURCE);
                artifact::write_file(&list, self.docker_apt_source()?.as_bytes(), CONFIG_MODE)?;

                // Only refresh the docker list; the full refresh happens at upgrade time
                self.run(
                    self.kind.command().args([
                        "update",
                        "-o",
                        "Dir::Etc::sourcelist=sources.list.d/docker.list",
                        "-o",
                        "Dir::Etc::sourceparts=-",
                        "-o",
                        "APT::Get::List-Cleanup=0",
                    ]),
                    deadline,
                )
                .await
            }
        }
    }

    /// Full package index refresh
    pub async fn refresh_metadata_cache(&self, deadline: Instant) -> Result<()> {
        let spec = match self.kind {
            ManagerKind::Apt => self.kind.command().arg("update"),
            ManagerKind::Yum => self.kind.command().arg("makecache"),
        };
        self.run(spec, deadline).await
    }

    pub async fn install(&self, package: &dyn Package, deadline: Instant) -> Result<()> {
        info!(parent: &self.log, package = package.name(), "Installing package");
        self.run(package.install_cmd(), deadline).await
    }

    pub async fn upgrade(&self, package: &dyn Package, deadline: Instant) -> Result<()> {
        info!(parent: &self.log, package = package.name(), "Upgrading package");
        self.run(package.upgrade_cmd(), deadline).await
    }

    pub async fn uninstall(&self, package: &dyn Package, deadline: Instant) -> Result<()> {
        info!(parent: &self.log, package = package.name(), "Removing package");
        self.run(package.uninstall_cmd(), deadline).await
    }

    /// Remove repository files added by [`PackageManager::configure`]
    pub fn cleanup(&self, source: ContainerdSource) -> Result<()> {
        if source != ContainerdSource::Docker {
            return Ok(());
        }
        match self.kind {
            ManagerKind::Apt => {
                artifact::remove_file(&paths::rooted(&self.root, paths::DOCKER_APT_SOURCE))?;
                artifact::remove_file(&paths::rooted(&self.root, paths::DOCKER_APT_KEY))
            }
            ManagerKind::Yum => {
                artifact::remove_file(&paths::rooted(&self.root, paths::DOCKER_YUM_REPO))
            }
        }
    }

    fn docker_distro(&self) -> &'static str {
        match self.os_info.os {
            Os::Ubuntu => "ubuntu",
            Os::Rhel => "rhel",
            Os::AmazonLinux => "centos",
        }
    }

    fn docker_apt_source(&self) -> Result<String> {
        let codename = self.os_info.codename.as_deref().ok_or_else(|| {
            Error::precondition("os-release has no VERSION_CODENAME for the docker apt source")
        })?;
        Ok(format!(
            "deb [arch={} signed-by={}] {}/{} {} stable\n",
            self.arch,
            paths::DOCKER_APT_KEY,
            DOCKER_DOWNLOAD_URL,
            self.docker_distro(),
            codename
        ))
    }

    async fn run(&self, spec: CommandSpec, deadline: Instant) -> Result<()> {
        let name = spec.to_string();
        retry::retry_until_deadline(&name, self.backoff, deadline, &self.log, || {
            self.runner.run(&spec)
        })
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::FakeRunner;
    use tempfile::TempDir;

    fn ubuntu() -> OsInfo {
        OsInfo {
            os: Os::Ubuntu,
            version_id: "22.04".to_string(),
            codename: Some("jammy".to_string()),
        }
    }

    fn rhel() -> OsInfo {
        OsInfo {
            os: Os::Rhel,
            version_id: "9.4".to_string(),
            codename: None,
        }
    }

    fn manager(
        kind: ManagerKind,
        os_info: OsInfo,
        root: &TempDir,
        runner: Arc<FakeRunner>,
    ) -> PackageManager {
        PackageManager::new(kind, os_info, Arch::Amd64, root.path(), runner, Span::none())
            .with_backoff(Duration::from_millis(5))
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn test_package_commands_are_fresh_per_call() {
        let pkg = DistroPackage::new("iptables", ManagerKind::Apt);
        let mut first = pkg.install_cmd();
        first.args.push("--mutated".to_string());
        assert_eq!(pkg.install_cmd().to_string(), "apt-get install -y iptables");
        assert_eq!(
            pkg.upgrade_cmd().to_string(),
            "apt-get install --only-upgrade -y iptables"
        );

        let yum = DistroPackage::new("containerd.io", ManagerKind::Yum);
        assert_eq!(yum.uninstall_cmd().to_string(), "yum remove -y containerd.io");
        assert_eq!(yum.upgrade_cmd().to_string(), "yum update -y containerd.io");
    }

    #[tokio::test]
    async fn test_apt_docker_configure_writes_source_and_refreshes_only_it() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let pm = manager(ManagerKind::Apt, ubuntu(), &root, runner.clone());

        pm.configure(ContainerdSource::Docker, deadline()).await.unwrap();

        let source = std::fs::read_to_string(root.path().join("etc/apt/sources.list.d/docker.list"))
            .unwrap();
        assert_eq!(
            source,
            "deb [arch=amd64 signed-by=/etc/apt/keyrings/docker.asc] https://download.docker.com/linux/ubuntu jammy stable\n"
        );

        let calls = runner.calls();
        assert_eq!(calls[0], "apt-get install -y ca-certificates");
        assert!(calls[1].starts_with("curl -fsSL https://download.docker.com/linux/ubuntu/gpg"));
        assert!(calls[2].contains("Dir::Etc::sourcelist=sources.list.d/docker.list"));

        pm.cleanup(ContainerdSource::Docker).unwrap();
        assert!(!root.path().join("etc/apt/sources.list.d/docker.list").exists());
    }

    #[tokio::test]
    async fn test_yum_docker_configure_sequence() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let pm = manager(ManagerKind::Yum, rhel(), &root, runner.clone());

        pm.configure(ContainerdSource::Docker, deadline()).await.unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "yum remove -y runc".to_string(),
                "yum install -y yum-utils".to_string(),
                "yum-config-manager --add-repo https://download.docker.com/linux/rhel/docker-ce.repo"
                    .to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_configure_is_noop_without_docker() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let pm = manager(ManagerKind::Apt, ubuntu(), &root, runner.clone());

        pm.configure(ContainerdSource::Distro, deadline()).await.unwrap();
        pm.cleanup(ContainerdSource::None).unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_install_retries_through_lock_contention() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new().fail_times("install -y containerd", 3));
        let pm = manager(ManagerKind::Apt, ubuntu(), &root, runner.clone());

        let pkg = pm.containerd_package(ContainerdSource::Distro).unwrap();
        pm.install(&pkg, deadline()).await.unwrap();

        assert_eq!(runner.calls_matching("install -y containerd").len(), 4);
    }

    #[tokio::test]
    async fn test_install_gives_up_at_deadline() {
        let root = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new().fail_always("iptables"));
        let pm = manager(ManagerKind::Yum, rhel(), &root, runner);

        let err = pm
            .install(&pm.iptables_package(), Instant::now() + Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { .. }));
    }

    #[test]
    fn test_containerd_package_per_source() {
        let root = TempDir::new().unwrap();
        let pm = manager(ManagerKind::Apt, ubuntu(), &root, Arc::new(FakeRunner::new()));
        assert!(pm.containerd_package(ContainerdSource::None).is_none());
        assert_eq!(
            pm.containerd_package(ContainerdSource::Docker).unwrap().name(),
            "containerd.io"
        );
    }
}
