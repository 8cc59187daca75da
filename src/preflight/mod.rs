//! Preflight checks for build validation.
//!
//! Validates that the host has what the selected stages will call before
//! any of them runs, so a missing `skopeo` is reported up front instead of
//! after a multi-gigabyte download.
//!
//! # Example
//!
//! ```rust,ignore
//! use disk_builder::{pipeline::Pipeline, preflight};
//!
//! let pipeline = Pipeline::build(&options)?;
//! preflight::check(&pipeline, &options)?;
//! ```

use std::path::Path;

use crate::artifact::disk::helpers::{EFI_TOOLS, GRUB_INSTALLERS, REQUIRED_TOOLS};
use crate::error::BuildError;
use crate::options::{BuildOptions, Source};
use crate::pipeline::{Pipeline, StageId};
use crate::process;

pub use crate::process::exists as command_exists;

/// Host tools a stage shells out to, as (command, package).
pub fn stage_tools(stage: StageId, options: &BuildOptions) -> Vec<(&'static str, &'static str)> {
    match stage {
        StageId::DownloadSquashfs => match &options.source {
            Source::Iso { location } if location.starts_with("http") => {
                vec![("curl", "curl")]
            }
            _ => Vec::new(),
        },
        StageId::ExtractSquashfs => vec![("unsquashfs", "squashfs-tools")],
        StageId::DumpSource => vec![("skopeo", "skopeo")],
        StageId::GenRawDisk => REQUIRED_TOOLS.iter().chain(EFI_TOOLS).copied().collect(),
        StageId::GenRawMbrDisk => REQUIRED_TOOLS.to_vec(),
        StageId::BuildArmImage | StageId::ConvertGce | StageId::ConvertVhd => Vec::new(),
    }
}

fn is_disk_stage(stage: StageId) -> bool {
    matches!(stage, StageId::GenRawDisk | StageId::GenRawMbrDisk)
}

/// Check that specific tools are available.
///
/// Returns one line per missing tool naming the package that provides it.
pub fn check_required_tools(
    tools: &[(&str, &str)],
    exists: impl Fn(&str) -> bool,
) -> Result<(), Vec<String>> {
    let mut missing: Vec<String> = Vec::new();
    for (tool, package) in tools {
        let line = format!("{tool} (install: {package})");
        if !exists(tool) && !missing.contains(&line) {
            missing.push(line);
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}

/// Check the host against everything `pipeline` will need.
pub fn check(pipeline: &Pipeline, options: &BuildOptions) -> Result<(), BuildError> {
    check_with(pipeline, options, process::exists, process::is_root())
}

fn check_with(
    pipeline: &Pipeline,
    options: &BuildOptions,
    exists: impl Fn(&str) -> bool,
    is_root: bool,
) -> Result<(), BuildError> {
    let tools: Vec<_> = pipeline
        .ids()
        .into_iter()
        .flat_map(|id| stage_tools(id, options))
        .collect();

    let mut problems = check_required_tools(&tools, &exists).err().unwrap_or_default();

    let needs_disk = pipeline.ids().into_iter().any(is_disk_stage);
    if needs_disk {
        if !GRUB_INSTALLERS.iter().any(|g| exists(g)) {
            problems.push(format!("one of {} (install: grub2)", GRUB_INSTALLERS.join(", ")));
        }
        if !is_root {
            problems.push("root privileges (loop devices and mounts)".to_string());
        }
    }

    if pipeline.contains(StageId::BuildArmImage) {
        match options.arm.builder.as_deref() {
            Some(builder) if builder_available(builder, &exists) => {}
            Some(builder) => problems.push(format!("ARM image builder {}", builder.display())),
            None => problems.push("ARM image builder (set arm.builder)".to_string()),
        }
    }

    if problems.is_empty() {
        return Ok(());
    }
    Err(BuildError::config(format!(
        "host is missing requirements:\n  {}",
        problems.join("\n  ")
    )))
}

fn builder_available(builder: &Path, exists: &impl Fn(&str) -> bool) -> bool {
    if builder.components().count() > 1 {
        builder.is_file()
    } else {
        exists(&builder.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::options::fixtures::{container_options, iso_options};
    use crate::options::OutputFormat;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("ls"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools() {
        let tools = &[("ls", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(tools, command_exists).is_ok());

        let tools = &[("nonexistent_command_xyz", "fake-package")];
        let missing = check_required_tools(tools, command_exists).unwrap_err();
        assert_eq!(missing, vec!["nonexistent_command_xyz (install: fake-package)"]);
    }

    #[test]
    fn iso_raw_needs_fetch_extract_and_disk_tools() {
        let opts = iso_options("/tmp/state".into(), &[OutputFormat::Raw]);
        let pipeline = Pipeline::build(&opts).unwrap();
        let err = check_with(&pipeline, &opts, |_| false, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let msg = err.to_string();
        for needle in ["curl", "unsquashfs", "sfdisk", "mkfs.vfat", "grub2-install", "root"] {
            assert!(msg.contains(needle), "{needle} not reported in {msg}");
        }
        assert!(!msg.contains("skopeo"));
    }

    #[test]
    fn local_squashfs_does_not_need_curl() {
        let mut opts = iso_options("/tmp/state".into(), &[OutputFormat::Vhd]);
        opts.source = Source::Iso {
            location: "/srv/kairos.squashfs".into(),
        };
        let pipeline = Pipeline::build(&opts).unwrap();
        let msg = check_with(&pipeline, &opts, |_| false, true)
            .unwrap_err()
            .to_string();
        assert!(!msg.contains("curl"));
        assert!(!msg.contains("root privileges"));
    }

    #[test]
    fn mbr_skips_vfat() {
        let opts = container_options("/tmp/state".into(), &[OutputFormat::MbrRaw]);
        let pipeline = Pipeline::build(&opts).unwrap();
        let msg = check_with(&pipeline, &opts, |_| false, true)
            .unwrap_err()
            .to_string();
        assert!(msg.contains("skopeo"));
        assert!(!msg.contains("mkfs.vfat"));
    }

    #[test]
    fn one_grub_installer_is_enough() {
        let opts = container_options("/tmp/state".into(), &[OutputFormat::Gce]);
        let pipeline = Pipeline::build(&opts).unwrap();
        assert!(check_with(&pipeline, &opts, |t| t != "grub2-install", true).is_ok());
    }

    #[test]
    fn arm_only_build_needs_builder_not_root() {
        let mut opts = container_options("/tmp/state".into(), &[OutputFormat::Arm]);
        opts.arm.builder = Some("build-arm-image".into());
        let pipeline = Pipeline::build(&opts).unwrap();
        assert!(check_with(&pipeline, &opts, |_| true, false).is_ok());

        let msg = check_with(&pipeline, &opts, |t| t != "build-arm-image", false)
            .unwrap_err()
            .to_string();
        assert!(msg.contains("build-arm-image"));
    }
}
