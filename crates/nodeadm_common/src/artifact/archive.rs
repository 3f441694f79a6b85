//! Gzipped tarball extraction (CNI plugins).

use super::{make_dirs, remove_file};
use crate::error::{Error, IoContext, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

/// Extract `archive_path` into `dest_dir`, then delete the archive.
///
/// Any entry resolving outside `dest_dir` aborts extraction. Directories that
/// already exist keep their permissions.
pub fn install_tar_gz(dest_dir: &Path, archive_path: &Path) -> Result<()> {
    make_dirs(dest_dir)?;
    let dest = dest_dir
        .canonicalize()
        .context(|| format!("resolve {}", dest_dir.display()))?;

    let file = File::open(archive_path).context(|| format!("open {}", archive_path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.set_overwrite(true);

    let entries = archive
        .entries()
        .context(|| format!("read {}", archive_path.display()))?;

    for entry in entries {
        let mut entry = entry.context(|| format!("read entry in {}", archive_path.display()))?;
        let entry_path = entry
            .path()
            .context(|| format!("entry path in {}", archive_path.display()))?
            .into_owned();

        let target = resolve_inside(&dest, &entry_path)?;

        if entry.header().entry_type() == EntryType::Directory {
            if !target.exists() {
                make_dirs(&target)?;
            }
            continue;
        }

        // unpack_in also rejects writes through symlinks pointing outside dest
        let unpacked = entry
            .unpack_in(&dest)
            .context(|| format!("extract {}", entry_path.display()))?;
        if !unpacked {
            return Err(traversal(&entry_path, &dest));
        }
    }

    remove_file(archive_path)
}

/// Lexically resolve `entry` under `dest`, refusing absolute paths and `..`
/// that climbs above the root.
fn resolve_inside(dest: &Path, entry: &Path) -> Result<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(traversal(entry, dest));
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(traversal(entry, dest)),
        }
    }
    Ok(dest.join(resolved))
}

fn traversal(entry: &Path, dest: &Path) -> Error {
    Error::PathTraversal {
        entry: entry.display().to_string(),
        dest: dest.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tar::{Builder, Header};
    use tempfile::TempDir;

    /// Build a tar.gz from raw (name, type, mode, data) tuples. Names are
    /// written straight into the header so hostile paths survive.
    fn build(path: &Path, entries: &[(&str, EntryType, u32, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, kind, mode, data) in entries {
            let mut header = Header::new_old();
            {
                let raw = header.as_old_mut();
                raw.name[..name.len()].copy_from_slice(name.as_bytes());
            }
            header.set_entry_type(*kind);
            header.set_mode(*mode);
            header.set_size(data.len() as u64);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_extracts_and_removes_archive() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("cni.tgz");
        build(
            &archive,
            &[
                ("./", EntryType::Directory, 0o755, b""),
                ("./bridge", EntryType::Regular, 0o755, b"bridge-bin"),
                ("./host-local", EntryType::Regular, 0o755, b"host-local-bin"),
            ],
        );
        let dest = tmp.path().join("opt/cni/bin");

        install_tar_gz(&dest, &archive).unwrap();

        assert_eq!(fs::read(dest.join("bridge")).unwrap(), b"bridge-bin");
        assert_eq!(fs::read(dest.join("host-local")).unwrap(), b"host-local-bin");
        assert!(!archive.exists());
    }

    #[test]
    fn test_rejects_parent_traversal() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("evil.tgz");
        build(
            &archive,
            &[("../escaped", EntryType::Regular, 0o644, b"pwned")],
        );
        let dest = tmp.path().join("dest");

        let err = install_tar_gz(&dest, &archive).unwrap_err();

        assert!(matches!(err, Error::PathTraversal { .. }));
        assert!(!tmp.path().join("escaped").exists());
        // Archive is kept for inspection when extraction fails
        assert!(archive.exists());
    }

    #[test]
    fn test_rejects_nested_traversal() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("evil.tgz");
        build(
            &archive,
            &[("bin/../../../outside", EntryType::Regular, 0o644, b"x")],
        );
        let dest = tmp.path().join("a/dest");

        assert!(install_tar_gz(&dest, &archive).is_err());
        assert!(!tmp.path().join("outside").exists());
    }

    #[test]
    fn test_preserves_existing_directory_permissions() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("dest");
        fs::create_dir_all(dest.join("bin")).unwrap();
        fs::set_permissions(dest.join("bin"), fs::Permissions::from_mode(0o700)).unwrap();

        let archive = tmp.path().join("a.tgz");
        build(
            &archive,
            &[
                ("bin/", EntryType::Directory, 0o777, b""),
                ("bin/loopback", EntryType::Regular, 0o755, b"lo"),
            ],
        );

        install_tar_gz(&dest, &archive).unwrap();

        let mode = fs::metadata(dest.join("bin")).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
        assert_eq!(fs::read(dest.join("bin/loopback")).unwrap(), b"lo");
    }

    #[test]
    fn test_resolve_inside() {
        let dest = Path::new("/opt/cni/bin");
        assert_eq!(
            resolve_inside(dest, Path::new("./a/../b")).unwrap(),
            PathBuf::from("/opt/cni/bin/b")
        );
        assert!(resolve_inside(dest, Path::new("/etc/passwd")).is_err());
        assert!(resolve_inside(dest, Path::new("..")).is_err());
    }
}
