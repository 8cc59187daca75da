//! Release squashfs retrieval and extraction.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::reset_dir;
use crate::artifact::{atomic_rename, partial_path};
use crate::process::Cmd;

pub const DEFAULT_REPOSITORY: &str = "kairos-io/kairos";

/// Release download URL for an artifact.
pub fn release_url(repository: &str, release_version: &str, artifact_name: &str) -> String {
    format!(
        "https://github.com/{repository}/releases/download/{release_version}/{artifact_name}.squashfs"
    )
}

/// True for locations fetched over the network.
fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn file_name_of(location: &str) -> String {
    let trimmed = location
        .split(['?', '#'])
        .next()
        .unwrap_or(location)
        .trim_end_matches('/');
    trimmed
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("rootfs.squashfs")
        .to_string()
}

/// Fetch the squashfs into `dest_dir`; remote URLs through `curl`, local
/// paths and `file://` URLs by copying.
pub fn fetch(location: &str, dest_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(file_name_of(location));
    let partial = partial_path(&dest);

    if is_remote(location) {
        tracing::info!(url = location, dest = %dest.display(), "downloading squashfs");
        Cmd::new("curl")
            .args(["-fL", "--retry", "3", "-o"])
            .arg_path(&partial)
            .arg(location)
            .error_msg("squashfs download failed")
            .run()?;
    } else {
        let src = Path::new(location.strip_prefix("file://").unwrap_or(location));
        tracing::info!(src = %src.display(), dest = %dest.display(), "copying squashfs");
        fs::copy(src, &partial)
            .with_context(|| format!("Failed to copy squashfs from {}", src.display()))?;
    }

    atomic_rename(&partial, &dest)?;
    Ok(dest)
}

/// Unpack `squashfs` into `dest`.
pub fn extract(squashfs: &Path, dest: &Path) -> Result<()> {
    reset_dir(dest)?;
    Cmd::new("unsquashfs")
        .args(["-f", "-d"])
        .arg_path(dest)
        .arg_path(squashfs)
        .error_msg("unsquashfs failed")
        .run()?;
    Ok(())
}
