//! Raw disk image builder.
//!
//! Turns a root filesystem tree into a partitioned, bootable raw image:
//! GPT with an ESP for EFI boot, or a single bootable MBR partition for
//! legacy BIOS boot. The partition table is written into the sparse file
//! first; formatting, population and bootloader installation then go
//! through a loop binding obtained from [`crate::loopdev::LoopManager`].
//!
//! The [`DiskImager`] trait is the seam the pipeline builds against, so
//! pipeline tests can substitute an in-process imager.

pub mod assembly;
pub mod helpers;
pub mod layout;
pub mod partitions;

pub use assembly::LoopDiskImager;
pub use layout::DiskLayout;

use anyhow::Result;
use std::path::PathBuf;

use crate::options::BootMode;

/// Partition table written to a raw image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionTable {
    Gpt,
    Mbr,
}

impl PartitionTable {
    pub fn for_boot_mode(mode: BootMode) -> Self {
        match mode {
            BootMode::Efi => PartitionTable::Gpt,
            BootMode::Legacy => PartitionTable::Mbr,
        }
    }
}

/// Everything needed to build one raw image.
#[derive(Debug, Clone)]
pub struct DiskRequest {
    /// Root filesystem tree copied into the data partition.
    pub rootfs: PathBuf,
    /// Apparent size of `rootfs` in bytes.
    pub rootfs_size: u64,
    /// Raw image to create. Overwritten if present.
    pub output: PathBuf,
    pub boot_mode: BootMode,
    /// Target architecture (`amd64`, `arm64`, ...), selects the EFI target.
    pub arch: String,
    pub extra_size_mb: u64,
    pub cloud_config: Option<PathBuf>,
    /// Scratch space for mount points.
    pub work_dir: PathBuf,
}

/// A finished raw disk image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDiskImage {
    pub path: PathBuf,
    pub size: u64,
    pub table: PartitionTable,
}

/// Builds raw disk images.
pub trait DiskImager {
    fn build(&self, request: &DiskRequest) -> Result<RawDiskImage>;
}
