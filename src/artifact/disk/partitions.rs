//! Filesystem creation, mounting and bootloader setup on bound partitions.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::layout::{DATA_LABEL, ESP_LABEL};
use crate::process::Cmd;

/// Format the ESP as FAT32.
pub fn format_esp(device: &Path) -> Result<()> {
    Cmd::new("mkfs.vfat")
        .args(["-F", "32", "-n", ESP_LABEL])
        .arg_path(device)
        .error_msg("mkfs.vfat failed")
        .run()?;
    Ok(())
}

/// Format the data partition as ext4.
pub fn format_data(device: &Path) -> Result<()> {
    Cmd::new("mkfs.ext4")
        .args(["-q", "-F", "-L", DATA_LABEL])
        .arg_path(device)
        .error_msg("mkfs.ext4 failed")
        .run()?;
    Ok(())
}

/// A mounted filesystem, unmounted when dropped.
#[derive(Debug)]
pub struct MountGuard {
    target: PathBuf,
    mounted: bool,
}

impl MountGuard {
    pub fn mount(device: &Path, target: &Path) -> Result<MountGuard> {
        fs::create_dir_all(target)
            .with_context(|| format!("Failed to create mount point {}", target.display()))?;
        Cmd::new("mount")
            .arg_path(device)
            .arg_path(target)
            .error_msg("mount failed")
            .run()?;
        tracing::debug!(device = %device.display(), target = %target.display(), "mounted");
        Ok(MountGuard {
            target: target.to_path_buf(),
            mounted: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.target
    }

    /// Unmount now, surfacing failures.
    pub fn unmount(mut self) -> Result<()> {
        self.mounted = false;
        Cmd::new("umount")
            .arg_path(&self.target)
            .error_msg("umount failed")
            .run()?;
        Ok(())
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if self.mounted {
            let _ = Cmd::new("umount")
                .arg("-l")
                .arg_path(&self.target)
                .allow_fail()
                .run();
        }
    }
}

/// Copy the rootfs tree into a mounted data partition.
pub fn populate(rootfs: &Path, target: &Path) -> Result<()> {
    let mut src = rootfs.as_os_str().to_os_string();
    src.push("/.");
    Cmd::new("cp")
        .arg("-a")
        .arg(&src)
        .arg_path(target)
        .error_msg("copying rootfs into data partition failed")
        .run()?;
    Ok(())
}

/// Install `cloud_config` as the OEM configuration.
pub fn install_cloud_config(cloud_config: &Path, target: &Path) -> Result<PathBuf> {
    let oem = target.join("oem");
    fs::create_dir_all(&oem)?;
    let dest = oem.join("90_custom.yaml");
    fs::copy(cloud_config, &dest).with_context(|| {
        format!(
            "Failed to copy cloud config {} to {}",
            cloud_config.display(),
            dest.display()
        )
    })?;
    Ok(dest)
}

/// GRUB target for EFI boot on `arch`.
pub fn efi_target(arch: &str) -> &'static str {
    match arch {
        "arm64" | "aarch64" => "arm64-efi",
        _ => "x86_64-efi",
    }
}

/// Directory name GRUB uses under `/boot` for an installer binary.
pub fn grub_dir_name(installer: &Path) -> &'static str {
    match installer.file_name().and_then(|n| n.to_str()) {
        Some("grub2-install") => "grub2",
        _ => "grub",
    }
}

/// Boot menu that finds the data partition by label.
pub fn grub_config() -> String {
    format!(
        "search --no-floppy --label --set=root {DATA_LABEL}\n\
         set default=0\n\
         set timeout=5\n\
         \n\
         menuentry \"Kairos\" {{\n\
         \x20   linux /boot/vmlinuz root=LABEL={DATA_LABEL} rw console=tty1 console=ttyS0\n\
         \x20   initrd /boot/initrd\n\
         }}\n"
    )
}

/// Where GRUB should be installed.
pub enum GrubTarget<'a> {
    /// EFI binaries into the mounted ESP.
    Efi { esp: &'a Path, arch: &'a str },
    /// Boot code into the disk's MBR.
    Bios { device: &'a Path },
}

/// Run the GRUB installer and write the menu into the data partition.
pub fn install_grub(installer: &Path, target: GrubTarget<'_>, data_root: &Path) -> Result<()> {
    let boot_dir = data_root.join("boot");
    fs::create_dir_all(&boot_dir)?;

    let cmd = Cmd::new(installer).arg(format!("--boot-directory={}", boot_dir.display()));
    let cmd = match target {
        GrubTarget::Efi { esp, arch } => cmd
            .arg(format!("--target={}", efi_target(arch)))
            .arg(format!("--efi-directory={}", esp.display()))
            .args(["--removable", "--no-nvram"]),
        GrubTarget::Bios { device } => cmd.arg("--target=i386-pc").arg_path(device),
    };
    cmd.error_msg("grub install failed").run()?;

    let grub_dir = boot_dir.join(grub_dir_name(installer));
    fs::create_dir_all(&grub_dir)?;
    fs::write(grub_dir.join("grub.cfg"), grub_config())
        .with_context(|| format!("Failed to write grub.cfg in {}", grub_dir.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn efi_target_by_arch() {
        assert_eq!(efi_target("amd64"), "x86_64-efi");
        assert_eq!(efi_target("x86_64"), "x86_64-efi");
        assert_eq!(efi_target("arm64"), "arm64-efi");
    }

    #[test]
    fn grub_dir_follows_installer_name() {
        assert_eq!(grub_dir_name(Path::new("/usr/sbin/grub2-install")), "grub2");
        assert_eq!(grub_dir_name(Path::new("/usr/sbin/grub-install")), "grub");
    }

    #[test]
    fn grub_config_boots_recovery_label() {
        let cfg = grub_config();
        assert!(cfg.starts_with("search --no-floppy --label --set=root COS_RECOVERY\n"));
        assert!(cfg.contains("    linux /boot/vmlinuz root=LABEL=COS_RECOVERY"));
        assert!(cfg.contains("    initrd /boot/initrd\n"));
    }

    #[test]
    fn cloud_config_lands_in_oem() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("user-data.yaml");
        fs::write(&cfg, "#cloud-config\nhostname: edge\n").unwrap();
        let target = dir.path().join("mnt");

        let dest = install_cloud_config(&cfg, &target).unwrap();
        assert_eq!(dest, target.join("oem/90_custom.yaml"));
        assert_eq!(
            fs::read_to_string(dest).unwrap(),
            "#cloud-config\nhostname: edge\n"
        );
    }
}
