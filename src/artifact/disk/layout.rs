//! Partition layout planning.
//!
//! Pure arithmetic over the rootfs size: no I/O. Every partition starts and
//! ends on a MiB boundary, so the total image size is a whole number of MiB.

use super::PartitionTable;
use crate::artifact::MIB;

pub const SECTOR_SIZE: u64 = 512;

/// 1 MiB alignment for the first partition.
pub const FIRST_PARTITION_OFFSET_SECTORS: u64 = 2048;

pub const ESP_SIZE_MB: u64 = 64;
pub const ESP_LABEL: &str = "COS_GRUB";
pub const DATA_LABEL: &str = "COS_RECOVERY";

/// Free space added on top of the scaled rootfs size.
pub const DATA_SLACK_MB: u64 = 256;

/// Room for the backup GPT at the end of the disk.
const GPT_TRAILER_MB: u64 = 1;

/// Planned partition layout for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskLayout {
    pub table: PartitionTable,
    /// ESP size in MiB, GPT only.
    pub esp_mb: Option<u64>,
    pub data_mb: u64,
    pub total_bytes: u64,
}

impl DiskLayout {
    pub fn plan(table: PartitionTable, rootfs_bytes: u64, extra_mb: u64) -> DiskLayout {
        let scaled = (rootfs_bytes * 5).div_ceil(4);
        let data_mb = scaled.div_ceil(MIB) + DATA_SLACK_MB + extra_mb;
        let offset_mb = FIRST_PARTITION_OFFSET_SECTORS * SECTOR_SIZE / MIB;

        let (esp_mb, total_mb) = match table {
            PartitionTable::Gpt => (
                Some(ESP_SIZE_MB),
                offset_mb + ESP_SIZE_MB + data_mb + GPT_TRAILER_MB,
            ),
            PartitionTable::Mbr => (None, offset_mb + data_mb),
        };

        DiskLayout {
            table,
            esp_mb,
            data_mb,
            total_bytes: total_mb * MIB,
        }
    }

    /// Number of partitions in the table.
    pub fn partition_count(&self) -> u32 {
        match self.table {
            PartitionTable::Gpt => 2,
            PartitionTable::Mbr => 1,
        }
    }

    /// 1-based index of the data partition.
    pub fn data_partition(&self) -> u32 {
        self.partition_count()
    }

    /// 1-based index of the ESP, if any.
    pub fn esp_partition(&self) -> Option<u32> {
        self.esp_mb.map(|_| 1)
    }

    /// Input for `sfdisk <image>`.
    pub fn sfdisk_script(&self) -> String {
        let mib_sectors = MIB / SECTOR_SIZE;
        let data_sectors = self.data_mb * mib_sectors;
        match (self.table, self.esp_mb) {
            (PartitionTable::Gpt, Some(esp_mb)) => {
                let esp_sectors = esp_mb * mib_sectors;
                let data_start = FIRST_PARTITION_OFFSET_SECTORS + esp_sectors;
                format!(
                    "label: gpt\n\
                     start={}, size={}, type=U, name=efi\n\
                     start={}, size={}, type=L, name=recovery\n",
                    FIRST_PARTITION_OFFSET_SECTORS, esp_sectors, data_start, data_sectors
                )
            }
            _ => format!(
                "label: dos\n\
                 start={}, size={}, type=83, bootable\n",
                FIRST_PARTITION_OFFSET_SECTORS, data_sectors
            ),
        }
    }
}
