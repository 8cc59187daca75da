//! Output artifacts.
//!
//! - [`naming`] - Output file names derived from the artifact metadata
//! - [`disk`] - Partitioned raw disk assembly on a loop device
//! - [`gce`] - GCE upload archive (`.gce.tar.gz`) from a raw disk
//! - [`vhd`] - Fixed VHD (`.vhd`) from a raw disk
//! - [`checksum`] - `sha256sum`-compatible sidecar files

pub mod checksum;
pub mod disk;
pub mod gce;
pub mod naming;
pub mod vhd;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BuildError;

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// Round `value` up to the next multiple of `granularity`.
pub fn round_up(value: u64, granularity: u64) -> u64 {
    if granularity == 0 {
        return value;
    }
    value.div_ceil(granularity) * granularity
}

/// Size of a converter's raw input. Missing or empty inputs break the
/// format invariants the converters rely on.
pub(crate) fn precursor_size(raw: &Path) -> Result<u64> {
    let meta = fs::metadata(raw).map_err(|e| {
        BuildError::FormatInvariant(format!("raw disk '{}' unavailable: {e}", raw.display()))
    })?;
    if !meta.is_file() || meta.len() == 0 {
        return Err(BuildError::FormatInvariant(format!(
            "raw disk '{}' is empty or not a regular file",
            raw.display()
        ))
        .into());
    }
    Ok(meta.len())
}

/// Sibling path used while an output is being written.
pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    dest.with_file_name(name)
}

/// Move a finished output into place.
pub(crate) fn atomic_rename(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Cross-device: copy then drop the partial.
            fs::copy(src, dst).with_context(|| {
                format!("Failed to copy {} to {}", src.display(), dst.display())
            })?;
            fs::remove_file(src)
                .with_context(|| format!("Failed to remove partial {}", src.display()))?;
            Ok(())
        }
    }
}
