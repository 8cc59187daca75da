//! Raw image assembly through a loop binding.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use super::layout::DiskLayout;
use super::partitions::{self, GrubTarget, MountGuard};
use super::{helpers, DiskImager, DiskRequest, PartitionTable, RawDiskImage};
use crate::loopdev::LoopManager;
use crate::process::{self, Cmd};

/// Builds images on the host with sfdisk, losetup, mkfs and GRUB.
#[derive(Debug, Clone)]
pub struct LoopDiskImager {
    loops: LoopManager,
}

impl LoopDiskImager {
    pub fn new(loops: LoopManager) -> Self {
        Self { loops }
    }
}

impl DiskImager for LoopDiskImager {
    fn build(&self, request: &DiskRequest) -> Result<RawDiskImage> {
        let table = PartitionTable::for_boot_mode(request.boot_mode);
        let layout = DiskLayout::plan(table, request.rootfs_size, request.extra_size_mb);
        tracing::info!(
            output = %request.output.display(),
            table = ?table,
            size = layout.total_bytes,
            data_mb = layout.data_mb,
            "assembling raw disk"
        );

        let installer = process::find_first(helpers::GRUB_INSTALLERS)
            .context("neither grub2-install nor grub-install found in PATH")?;

        create_partitioned_image(request, &layout)?;

        let device = self.loops.attach(&request.output)?;
        device.wait_for_partitions(layout.partition_count())?;

        let data_dev = device.partition(layout.data_partition());
        partitions::format_data(&data_dev)?;
        let esp_dev = layout.esp_partition().map(|i| device.partition(i));
        if let Some(esp_dev) = &esp_dev {
            partitions::format_esp(esp_dev)?;
        }

        let mount_root = request.work_dir.join("mnt");
        let data = MountGuard::mount(&data_dev, &mount_root.join("data"))?;
        partitions::populate(&request.rootfs, data.path())?;
        if let Some(cloud_config) = &request.cloud_config {
            partitions::install_cloud_config(cloud_config, data.path())?;
        }

        match &esp_dev {
            Some(esp_dev) => {
                let esp = MountGuard::mount(esp_dev, &mount_root.join("efi"))?;
                partitions::install_grub(
                    &installer,
                    GrubTarget::Efi {
                        esp: esp.path(),
                        arch: &request.arch,
                    },
                    data.path(),
                )?;
                esp.unmount()?;
            }
            None => partitions::install_grub(
                &installer,
                GrubTarget::Bios {
                    device: device.device(),
                },
                data.path(),
            )?,
        }

        data.unmount()?;
        device.detach()?;

        Ok(RawDiskImage {
            path: request.output.clone(),
            size: layout.total_bytes,
            table,
        })
    }
}

/// Create the sparse image and write its partition table.
fn create_partitioned_image(request: &DiskRequest, layout: &DiskLayout) -> Result<PathBuf> {
    if let Some(parent) = request.output.parent() {
        fs::create_dir_all(parent)?;
    }
    {
        let file = fs::File::create(&request.output)
            .with_context(|| format!("Failed to create {}", request.output.display()))?;
        file.set_len(layout.total_bytes)?;
    }

    Cmd::new("sfdisk")
        .arg("--quiet")
        .arg_path(&request.output)
        .stdin(layout.sfdisk_script())
        .error_msg("sfdisk failed to create partition table")
        .run()?;
    Ok(request.output.clone())
}
