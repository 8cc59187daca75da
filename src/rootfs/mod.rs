//! Root filesystem provider.
//!
//! Produces the unpacked root filesystem tree the disk builder copies into
//! the data partition, either from a release squashfs or from a container
//! image. [`RootfsProvider`] is the seam between the pipeline and the host
//! tools (`curl`, `unsquashfs`, `skopeo`).

pub mod container;
pub mod squashfs;

use anyhow::{bail, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::disk::helpers::calculate_dir_size;

/// An unpacked root filesystem tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rootfs {
    pub path: PathBuf,
    /// Apparent size of the tree in bytes.
    pub size_bytes: u64,
}

pub trait RootfsProvider {
    /// Download (or copy) the squashfs at `location` into `dest_dir`.
    fn fetch_squashfs(&self, location: &str, dest_dir: &Path) -> Result<PathBuf>;

    /// Unpack `squashfs` into `dest`, replacing anything already there.
    fn extract_squashfs(&self, squashfs: &Path, dest: &Path) -> Result<Rootfs>;

    /// Export the filesystem of container image `reference` into `dest`.
    fn dump_container(&self, reference: &str, dest: &Path) -> Result<Rootfs>;
}

/// Provider backed by host tools.
#[derive(Debug, Clone)]
pub struct HostRootfsProvider {
    /// Scratch space for image layers.
    work_dir: PathBuf,
}

impl HostRootfsProvider {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }
}

impl RootfsProvider for HostRootfsProvider {
    fn fetch_squashfs(&self, location: &str, dest_dir: &Path) -> Result<PathBuf> {
        squashfs::fetch(location, dest_dir)
    }

    fn extract_squashfs(&self, squashfs: &Path, dest: &Path) -> Result<Rootfs> {
        squashfs::extract(squashfs, dest)?;
        materialize(dest)
    }

    fn dump_container(&self, reference: &str, dest: &Path) -> Result<Rootfs> {
        container::dump(reference, dest, &self.work_dir)?;
        materialize(dest)
    }
}

/// Describe an unpacked tree. Fails if the tree is missing or empty.
pub fn materialize(path: &Path) -> Result<Rootfs> {
    if !path.is_dir() {
        bail!("root filesystem {} is not a directory", path.display());
    }
    if fs::read_dir(path)?.next().is_none() {
        bail!("root filesystem {} is empty", path.display());
    }
    let size_bytes = calculate_dir_size(path)?;
    tracing::info!(rootfs = %path.display(), size_bytes, "root filesystem ready");
    Ok(Rootfs {
        path: path.to_path_buf(),
        size_bytes,
    })
}

/// Start `dest` empty.
pub(crate) fn reset_dir(dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialize_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/kairos-release"), b"KAIROS_FLAVOR=alpine\n").unwrap();

        let rootfs = materialize(dir.path()).unwrap();
        assert_eq!(rootfs.size_bytes, 21);
        assert_eq!(rootfs.path, dir.path());
    }

    #[test]
    fn materialize_rejects_empty_or_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(materialize(dir.path()).is_err());
        assert!(materialize(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn reset_dir_clears_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("rootfs");
        fs::create_dir_all(dest.join("old")).unwrap();
        reset_dir(&dest).unwrap();
        assert!(dest.is_dir());
        assert!(fs::read_dir(&dest).unwrap().next().is_none());
    }
}
