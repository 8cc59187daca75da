//! Fixed VHD.
//!
//! A fixed VHD is the disk contents stored contiguously followed by a
//! 512-byte big-endian footer. The data is zero-extended so that data plus
//! footer is a whole number of MiB, which is what Azure's importer accepts.
//!
//! Footer layout (offsets in bytes):
//!
//! | Offset | Size | Field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 8    | cookie `conectix`                      |
//! | 8      | 4    | features `0x00000002`                  |
//! | 12     | 4    | format version `0x00010000`            |
//! | 16     | 8    | data offset, all ones for fixed disks  |
//! | 24     | 4    | timestamp, seconds since 2000-01-01    |
//! | 28     | 4    | creator application                    |
//! | 32     | 4    | creator version                        |
//! | 36     | 4    | creator host OS                        |
//! | 40     | 8    | original size                          |
//! | 48     | 8    | current size                           |
//! | 56     | 4    | geometry (cylinders u16, heads, spt)   |
//! | 60     | 4    | disk type `0x00000002` (fixed)         |
//! | 64     | 4    | checksum                               |
//! | 68     | 16   | unique id                              |
//! | 84     | 1    | saved state                            |
//! | 85     | 427  | reserved, zero                         |

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::naming::converted_name;
use super::{atomic_rename, partial_path, precursor_size, round_up, MIB};
use crate::error::BuildError;

pub const SUFFIX: &str = ".vhd";
pub const FOOTER_SIZE: usize = 512;

pub const COOKIE: [u8; 8] = *b"conectix";
pub const FEATURES: u32 = 0x0000_0002;
pub const FORMAT_VERSION: u32 = 0x0001_0000;
pub const FIXED_DATA_OFFSET: u64 = u64::MAX;
pub const DISK_TYPE_FIXED: u32 = 0x0000_0002;

/// Creator application tag.
pub const CREATOR_APP: [u8; 4] = *b"elem";
pub const CREATOR_VERSION: u32 = 0x0001_0000;
/// Creator host OS tag.
pub const CREATOR_HOST_OS: [u8; 4] = *b"suse";

/// 2000-01-01T00:00:00Z as a Unix timestamp.
const VHD_EPOCH: u64 = 946_684_800;

/// CHS geometry as stored in the footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
}

impl Geometry {
    /// Geometry for a disk of `size` bytes, using the CHS derivation every
    /// VHD consumer expects.
    pub fn for_size(size: u64) -> Geometry {
        let mut total = size / 512;
        if total > 65535 * 16 * 255 {
            total = 65535 * 16 * 255;
        }

        let (spt, heads, cyl_times_heads) = if total >= 65535 * 16 * 63 {
            (255u64, 16u64, total / 255)
        } else {
            let mut spt = 17;
            let mut cth = total / spt;
            let mut heads = (cth + 1023) / 1024;
            if heads < 4 {
                heads = 4;
            }
            if cth >= heads * 1024 || heads > 16 {
                spt = 31;
                heads = 16;
                cth = total / spt;
            }
            if cth >= heads * 1024 {
                spt = 63;
                heads = 16;
                cth = total / spt;
            }
            (spt, heads, cth)
        };

        Geometry {
            cylinders: (cyl_times_heads / heads) as u16,
            heads: heads as u8,
            sectors_per_track: spt as u8,
        }
    }
}

/// Decoded VHD footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhdFooter {
    pub features: u32,
    pub format_version: u32,
    pub data_offset: u64,
    pub timestamp: u32,
    pub creator_app: [u8; 4],
    pub creator_version: u32,
    pub creator_host_os: [u8; 4],
    pub original_size: u64,
    pub current_size: u64,
    pub geometry: Geometry,
    pub disk_type: u32,
    pub checksum: u32,
    pub unique_id: [u8; 16],
    pub saved_state: u8,
}

impl VhdFooter {
    /// Footer for a fixed disk whose data section is `size` bytes.
    pub fn fixed(size: u64, timestamp: u32, unique_id: [u8; 16]) -> VhdFooter {
        let mut footer = VhdFooter {
            features: FEATURES,
            format_version: FORMAT_VERSION,
            data_offset: FIXED_DATA_OFFSET,
            timestamp,
            creator_app: CREATOR_APP,
            creator_version: CREATOR_VERSION,
            creator_host_os: CREATOR_HOST_OS,
            original_size: size,
            current_size: size,
            geometry: Geometry::for_size(size),
            disk_type: DISK_TYPE_FIXED,
            checksum: 0,
            unique_id,
            saved_state: 0,
        };
        footer.checksum = checksum(&footer.encode(0));
        footer
    }

    fn encode(&self, checksum: u32) -> [u8; FOOTER_SIZE] {
        let mut b = [0u8; FOOTER_SIZE];
        b[0..8].copy_from_slice(&COOKIE);
        b[8..12].copy_from_slice(&self.features.to_be_bytes());
        b[12..16].copy_from_slice(&self.format_version.to_be_bytes());
        b[16..24].copy_from_slice(&self.data_offset.to_be_bytes());
        b[24..28].copy_from_slice(&self.timestamp.to_be_bytes());
        b[28..32].copy_from_slice(&self.creator_app);
        b[32..36].copy_from_slice(&self.creator_version.to_be_bytes());
        b[36..40].copy_from_slice(&self.creator_host_os);
        b[40..48].copy_from_slice(&self.original_size.to_be_bytes());
        b[48..56].copy_from_slice(&self.current_size.to_be_bytes());
        b[56..58].copy_from_slice(&self.geometry.cylinders.to_be_bytes());
        b[58] = self.geometry.heads;
        b[59] = self.geometry.sectors_per_track;
        b[60..64].copy_from_slice(&self.disk_type.to_be_bytes());
        b[64..68].copy_from_slice(&checksum.to_be_bytes());
        b[68..84].copy_from_slice(&self.unique_id);
        b[84] = self.saved_state;
        b
    }

    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        self.encode(self.checksum)
    }

    /// Decode and verify a footer.
    pub fn from_bytes(b: &[u8]) -> Result<VhdFooter, BuildError> {
        if b.len() != FOOTER_SIZE {
            return Err(BuildError::FormatInvariant(format!(
                "VHD footer must be {FOOTER_SIZE} bytes, got {}",
                b.len()
            )));
        }
        if b[0..8] != COOKIE {
            return Err(BuildError::FormatInvariant("missing VHD cookie".into()));
        }

        let u32_at = |o: usize| u32::from_be_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]]);
        let u64_at = |o: usize| {
            let mut v = [0u8; 8];
            v.copy_from_slice(&b[o..o + 8]);
            u64::from_be_bytes(v)
        };
        let tag_at = |o: usize| [b[o], b[o + 1], b[o + 2], b[o + 3]];
        let mut unique_id = [0u8; 16];
        unique_id.copy_from_slice(&b[68..84]);

        let footer = VhdFooter {
            features: u32_at(8),
            format_version: u32_at(12),
            data_offset: u64_at(16),
            timestamp: u32_at(24),
            creator_app: tag_at(28),
            creator_version: u32_at(32),
            creator_host_os: tag_at(36),
            original_size: u64_at(40),
            current_size: u64_at(48),
            geometry: Geometry {
                cylinders: u16::from_be_bytes([b[56], b[57]]),
                heads: b[58],
                sectors_per_track: b[59],
            },
            disk_type: u32_at(60),
            checksum: u32_at(64),
            unique_id,
            saved_state: b[84],
        };

        let expected = checksum(&footer.encode(0));
        if footer.checksum != expected {
            return Err(BuildError::FormatInvariant(format!(
                "VHD footer checksum {:#010x} does not match {:#010x}",
                footer.checksum, expected
            )));
        }
        Ok(footer)
    }
}

/// One's complement of the byte sum of a footer whose checksum field is zero.
pub fn checksum(footer: &[u8]) -> u32 {
    !footer
        .iter()
        .fold(0u32, |acc, b| acc.wrapping_add(u32::from(*b)))
}

/// Size of the data section for a raw image of `raw_size` bytes.
pub fn data_size(raw_size: u64) -> u64 {
    round_up(raw_size + FOOTER_SIZE as u64, MIB) - FOOTER_SIZE as u64
}

fn vhd_timestamp(now: SystemTime) -> u32 {
    let unix = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    u32::try_from(unix.saturating_sub(VHD_EPOCH)).unwrap_or(u32::MAX)
}

/// Convert `raw` into `<output_dir>/<raw name>.vhd`.
pub fn convert(raw: &Path, output_dir: &Path) -> Result<PathBuf> {
    let size = precursor_size(raw)?;
    let data = data_size(size);
    let dest = output_dir.join(converted_name(raw, SUFFIX));
    tracing::info!(raw = %raw.display(), size, data, "writing fixed VHD");

    let partial = partial_path(&dest);
    fs::create_dir_all(output_dir)?;
    fs::copy(raw, &partial).with_context(|| {
        format!("Failed to copy {} to {}", raw.display(), partial.display())
    })?;

    let footer = VhdFooter::fixed(
        data,
        vhd_timestamp(SystemTime::now()),
        *uuid::Uuid::new_v4().as_bytes(),
    );

    let mut f = OpenOptions::new()
        .write(true)
        .open(&partial)
        .with_context(|| format!("Failed to open {}", partial.display()))?;
    f.set_len(data)?;
    f.seek(SeekFrom::Start(data))?;
    f.write_all(&footer.to_bytes())?;
    f.sync_all()?;
    drop(f);

    atomic_rename(&partial, &dest)?;
    Ok(dest)
}
