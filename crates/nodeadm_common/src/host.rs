//! Everything a flow needs to act on a host.

use crate::artifact::{ArtifactFetcher, MemoryFetcher};
use crate::command::{CommandRunner, FakeRunner};
use crate::daemon::{DaemonManager, FakeDaemonManager};
use crate::packagemanager::{ManagerKind, PackageManager};
use crate::paths;
use crate::platform::{Arch, Os, OsInfo};
use crate::retry::DEFAULT_BACKOFF;
use crate::tracker::Tracker;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

const FAKE_BACKOFF: Duration = Duration::from_millis(5);

pub struct Host {
    /// `/` in production, a temp dir in tests
    pub root: PathBuf,
    pub os_info: OsInfo,
    pub arch: Arch,
    pub runner: Arc<dyn CommandRunner>,
    pub daemons: Arc<dyn DaemonManager>,
    pub fetcher: Arc<dyn ArtifactFetcher>,
    pub packages: PackageManager,
    /// Sleep between retries and status polls
    pub backoff: Duration,
    pub log: Span,
}

impl Host {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root: impl Into<PathBuf>,
        os_info: OsInfo,
        arch: Arch,
        runner: Arc<dyn CommandRunner>,
        daemons: Arc<dyn DaemonManager>,
        fetcher: Arc<dyn ArtifactFetcher>,
        packages: PackageManager,
        log: Span,
    ) -> Self {
        Self {
            root: root.into(),
            os_info,
            arch,
            runner,
            daemons,
            fetcher,
            packages,
            backoff: DEFAULT_BACKOFF,
            log,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self.packages = self.packages.with_backoff(backoff);
        self
    }

    /// Absolute host path resolved under [`Host::root`]
    pub fn path(&self, path: &str) -> PathBuf {
        paths::rooted(&self.root, path)
    }

    pub fn tracker_path(&self) -> PathBuf {
        self.path(paths::TRACKER_FILE)
    }

    pub fn new_tracker(&self) -> Tracker {
        Tracker::new(self.tracker_path())
    }

    /// Ubuntu/amd64 host under `root` backed by the given fakes
    pub fn with_fakes(
        root: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        daemons: Arc<dyn DaemonManager>,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        let root = root.into();
        let os_info = OsInfo {
            os: Os::Ubuntu,
            version_id: "22.04".to_string(),
            codename: Some("jammy".to_string()),
        };
        let packages = PackageManager::new(
            ManagerKind::Apt,
            os_info.clone(),
            Arch::Amd64,
            root.clone(),
            runner.clone(),
            Span::none(),
        );
        Self::new(
            root,
            os_info,
            Arch::Amd64,
            runner,
            daemons,
            fetcher,
            packages,
            Span::none(),
        )
        .with_backoff(FAKE_BACKOFF)
    }

    /// [`Host::with_fakes`] with an empty fetcher and default fakes
    pub fn fake(root: impl Into<PathBuf>) -> Self {
        Self::with_fakes(
            root,
            Arc::new(FakeRunner::new()),
            Arc::new(FakeDaemonManager::new()),
            Arc::new(MemoryFetcher::new()),
        )
    }
}
