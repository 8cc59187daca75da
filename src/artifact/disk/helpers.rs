//! Size accounting and host tool lists for disk image building.

use anyhow::{Context, Result};
use std::path::Path;
use walkdir::WalkDir;

/// Host tools the disk stages need, as (tool, package).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("sfdisk", "util-linux"),
    ("losetup", "util-linux"),
    ("mount", "util-linux"),
    ("umount", "util-linux"),
    ("mkfs.ext4", "e2fsprogs"),
    ("cp", "coreutils"),
];

/// Needed only when an ESP is created.
pub const EFI_TOOLS: &[(&str, &str)] = &[("mkfs.vfat", "dosfstools")];

/// Either one satisfies the bootloader step.
pub const GRUB_INSTALLERS: &[&str] = &["grub2-install", "grub-install"];

/// Apparent size of a directory tree in bytes. Symlinks are not followed.
pub fn calculate_dir_size(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }

    let mut total = 0;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.with_context(|| format!("walking {}", path.display()))?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_tool_lists_are_complete() {
        for (tool, package) in REQUIRED_TOOLS.iter().chain(EFI_TOOLS) {
            assert!(!tool.is_empty());
            assert!(!package.is_empty());
        }
        assert!(!GRUB_INSTALLERS.is_empty());
    }

    #[test]
    fn test_calculate_dir_size() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc/ssh")).unwrap();
        fs::write(dir.path().join("etc/hostname"), b"kairos\n").unwrap();
        fs::write(dir.path().join("etc/ssh/sshd_config"), vec![0u8; 1000]).unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("/usr/lib/os-release", dir.path().join("etc/os-release"))
            .unwrap();

        assert_eq!(calculate_dir_size(dir.path()).unwrap(), 1007);
        assert_eq!(calculate_dir_size(&dir.path().join("missing")).unwrap(), 0);
    }
}
