//! Stage identifiers and the master stage table.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::actions;
use super::context::StageContext;
use crate::options::{BootMode, BuildOptions, OutputFormat};

/// Stable stage identifiers. Operators and tests key off these strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageId {
    DownloadSquashfs,
    ExtractSquashfs,
    DumpSource,
    GenRawDisk,
    GenRawMbrDisk,
    BuildArmImage,
    ConvertGce,
    ConvertVhd,
}

impl StageId {
    pub const fn as_str(self) -> &'static str {
        match self {
            StageId::DownloadSquashfs => "download-squashfs",
            StageId::ExtractSquashfs => "extract-squashfs",
            StageId::DumpSource => "dump-source",
            StageId::GenRawDisk => "gen-raw-disk",
            StageId::GenRawMbrDisk => "gen-raw-mbr-disk",
            StageId::BuildArmImage => "build-arm-image",
            StageId::ConvertGce => "convert-gce",
            StageId::ConvertVhd => "convert-vhd",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage: identifier, applicability predicate and action.
#[derive(Debug, Clone, Copy)]
pub struct Stage {
    pub id: StageId,
    pub applies: fn(&BuildOptions) -> bool,
    pub run: fn(&mut StageContext<'_>) -> anyhow::Result<()>,
}

fn iso_rootfs(o: &BuildOptions) -> bool {
    o.source.is_iso() && !o.formats.is_empty()
}

fn container_rootfs(o: &BuildOptions) -> bool {
    o.source.is_container() && !o.formats.is_empty()
}

fn efi_disk(o: &BuildOptions) -> bool {
    o.boot_mode == BootMode::Efi
        && [OutputFormat::Raw, OutputFormat::Gce, OutputFormat::Vhd]
            .iter()
            .any(|f| o.wants(*f))
}

fn mbr_disk(o: &BuildOptions) -> bool {
    o.boot_mode == BootMode::Legacy
}

fn arm_image(o: &BuildOptions) -> bool {
    o.wants(OutputFormat::Arm)
}

fn gce(o: &BuildOptions) -> bool {
    o.wants(OutputFormat::Gce)
}

fn vhd(o: &BuildOptions) -> bool {
    o.wants(OutputFormat::Vhd)
}

/// Every known stage in execution order.
pub const MASTER_STAGES: &[Stage] = &[
    Stage {
        id: StageId::DownloadSquashfs,
        applies: iso_rootfs,
        run: actions::download_squashfs,
    },
    Stage {
        id: StageId::ExtractSquashfs,
        applies: iso_rootfs,
        run: actions::extract_squashfs,
    },
    Stage {
        id: StageId::DumpSource,
        applies: container_rootfs,
        run: actions::dump_source,
    },
    Stage {
        id: StageId::GenRawDisk,
        applies: efi_disk,
        run: actions::gen_raw_disk,
    },
    Stage {
        id: StageId::GenRawMbrDisk,
        applies: mbr_disk,
        run: actions::gen_raw_mbr_disk,
    },
    Stage {
        id: StageId::BuildArmImage,
        applies: arm_image,
        run: actions::build_arm_image,
    },
    Stage {
        id: StageId::ConvertGce,
        applies: gce,
        run: actions::convert_gce,
    },
    Stage {
        id: StageId::ConvertVhd,
        applies: vhd,
        run: actions::convert_vhd,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_kebab_case() {
        assert_eq!(StageId::GenRawMbrDisk.to_string(), "gen-raw-mbr-disk");
        assert_eq!(
            serde_json::to_string(&StageId::DownloadSquashfs).unwrap(),
            "\"download-squashfs\""
        );
        for stage in MASTER_STAGES {
            let json = serde_json::to_string(&stage.id).unwrap();
            assert_eq!(json, format!("\"{}\"", stage.id));
        }
    }

    #[test]
    fn master_table_has_each_stage_once() {
        let mut ids: Vec<_> = MASTER_STAGES.iter().map(|s| s.id.as_str()).collect();
        let len = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), len);
        assert_eq!(len, 8);
    }
}
