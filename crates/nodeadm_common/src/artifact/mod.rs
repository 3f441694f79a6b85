//! Artifact installation.
//!
//! Binaries land with mode 0755, configuration with 0644 and any directory
//! created on the way with 0755. A verified install stages into `<dest>.new`
//! and only renames over `dest` once the digest matches.

mod archive;
mod checksum;
mod fetcher;

pub use archive::install_tar_gz;
pub use checksum::{
    file_sha256, mismatch, parse_gnu_checksum, ChecksumSource, Source, TrustedSource,
};
pub use fetcher::{
    Artifact, ArtifactFetcher, ManifestFetcher, MemoryFetcher, ReleaseManifest,
    DEFAULT_MANIFEST_URL,
};

use crate::error::{IoContext, Result};
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{info, Span};

pub const BINARY_MODE: u32 = 0o755;
pub const CONFIG_MODE: u32 = 0o644;
pub const DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Installed file already matches; nothing was written
    UpToDate,
    Upgraded,
}

/// Create `path` and any missing parents with [`DIR_MODE`]
pub fn make_dirs(path: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(path)
        .context(|| format!("create directory {}", path.display()))
}

/// Copy `source` to a new file at `dest`.
///
/// Fails if `dest` already exists; callers remove stale files first.
pub fn install_file<R: Read + ?Sized>(dest: &Path, source: &mut R, mode: u32) -> Result<()> {
    if let Some(parent) = dest.parent() {
        make_dirs(parent)?;
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(dest)
        .context(|| format!("create {}", dest.display()))?;

    io::copy(source, &mut file).context(|| format!("write {}", dest.display()))?;

    // create_new honours the umask; force the requested bits
    fs::set_permissions(dest, fs::Permissions::from_mode(mode))
        .context(|| format!("chmod {}", dest.display()))
}

/// Write a small file (config, unit) replacing whatever was there.
///
/// The content is staged next to `dest` and renamed over it, so `dest` is
/// either the old file or the new one.
pub fn write_file(dest: &Path, content: &[u8], mode: u32) -> Result<()> {
    let staged = staging_path(dest);
    remove_file(&staged)?;
    install_file(&staged, &mut &content[..], mode)?;
    fs::rename(&staged, dest)
        .context(|| format!("rename {} to {}", staged.display(), dest.display()))
}

/// Remove a file; a missing file is not an error
pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(crate::Error::io(format!("remove {}", path.display()), e)),
    }
}

/// Remove a directory tree; a missing directory is not an error
pub fn remove_dir_all(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(crate::Error::io(format!("remove {}", path.display()), e)),
    }
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".new");
    dest.with_file_name(name)
}

/// Install `source` at `dest` only if its digest verifies.
///
/// On mismatch nothing at `dest` changes and `Error::Checksum` is returned.
pub fn install_verified(name: &str, dest: &Path, source: &mut dyn Source, mode: u32) -> Result<()> {
    let staged = staging_path(dest);
    remove_file(&staged)?;

    install_file(&staged, &mut *source, mode)?;

    if !source.verify_checksum() {
        remove_file(&staged)?;
        return Err(mismatch(name, &*source));
    }

    fs::rename(&staged, dest)
        .context(|| format!("rename {} to {}", staged.display(), dest.display()))
}

/// Replace `installed` with `source` unless the installed file already matches.
pub fn upgrade(
    name: &str,
    installed: &Path,
    source: &mut dyn Source,
    mode: u32,
    log: &Span,
) -> Result<UpgradeOutcome> {
    if installed.exists() {
        let current = file_sha256(installed)?;
        if current == source.expected_checksum() {
            info!(
                parent: log,
                artifact = name,
                path = %installed.display(),
                "No new version found, skipping upgrade"
            );
            return Ok(UpgradeOutcome::UpToDate);
        }
    }

    install_verified(name, installed, source, mode)?;
    info!(parent: log, artifact = name, path = %installed.display(), "Upgraded");
    Ok(UpgradeOutcome::Upgraded)
}
