//! CNI plugin bundle (tarball extracted into `/opt/cni/bin`).

use crate::artifact::{self, Artifact, CONFIG_MODE};
use crate::error::Result;
use crate::host::Host;
use crate::paths;
use tracing::info;

const ARCHIVE_NAME: &str = "cni-plugins.tgz";

/// Download, verify and extract the plugin bundle.
///
/// Also used for upgrades: extraction overwrites plugin binaries in place.
pub async fn install(host: &Host) -> Result<()> {
    let mut source = host.fetcher.fetch(Artifact::CniPlugins).await?;
    let bin_dir = host.path(paths::CNI_BIN_DIR);
    let archive = host.path(paths::CNI_DIR).join(ARCHIVE_NAME);

    artifact::install_verified(
        Artifact::CniPlugins.as_str(),
        &archive,
        source.as_mut(),
        CONFIG_MODE,
    )?;
    artifact::install_tar_gz(&bin_dir, &archive)?;

    info!(parent: &host.log, component = "cni-plugins", path = %bin_dir.display(), "Installed");
    Ok(())
}

pub fn uninstall(host: &Host) -> Result<()> {
    artifact::remove_dir_all(&host.path(paths::CNI_DIR))?;
    artifact::remove_dir_all(&host.path(paths::CNI_CONFIG_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryFetcher;
    use crate::command::FakeRunner;
    use crate::daemon::FakeDaemonManager;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn bundle() -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(6);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, "bridge", &b"bridge"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[tokio::test]
    async fn test_install_extracts_and_removes_archive() {
        let tmp = TempDir::new().unwrap();
        let fetcher = MemoryFetcher::new().with(Artifact::CniPlugins, &bundle());
        let host = Host::with_fakes(
            tmp.path(),
            Arc::new(FakeRunner::new()),
            Arc::new(FakeDaemonManager::new()),
            Arc::new(fetcher),
        );

        install(&host).await.unwrap();

        let bin = host.path(paths::CNI_BIN_DIR).join("bridge");
        assert_eq!(std::fs::read(bin).unwrap(), b"bridge");
        assert!(!host.path(paths::CNI_DIR).join(ARCHIVE_NAME).exists());

        uninstall(&host).unwrap();
        assert!(!host.path(paths::CNI_DIR).exists());
    }

    #[tokio::test]
    async fn test_bad_bundle_never_extracted() {
        let tmp = TempDir::new().unwrap();
        let fetcher = MemoryFetcher::new().with_bad_checksum(Artifact::CniPlugins, &bundle());
        let host = Host::with_fakes(
            tmp.path(),
            Arc::new(FakeRunner::new()),
            Arc::new(FakeDaemonManager::new()),
            Arc::new(fetcher),
        );

        assert!(install(&host).await.unwrap_err().is_checksum());
        assert!(!host.path(paths::CNI_BIN_DIR).join("bridge").exists());
    }
}
