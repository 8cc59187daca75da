//! Normalized build request.
//!
//! [`BuildOptions`] is the immutable snapshot the pipeline builder selects
//! stages from. It is produced from configuration by
//! [`crate::config::BuildConfig::into_options`], or built directly by
//! library callers and checked with [`BuildOptions::validate`].

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::artifact::naming::ArtifactHints;
use crate::error::BuildError;

/// Where the root filesystem comes from. Exactly one source per build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Release squashfs of an ISO build. `location` is a URL or local path.
    Iso { location: String },
    /// Container image reference including transport (`docker://...`).
    ContainerImage { reference: String },
}

impl Source {
    pub fn is_iso(&self) -> bool {
        matches!(self, Source::Iso { .. })
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Source::ContainerImage { .. })
    }

    pub fn location(&self) -> &str {
        match self {
            Source::Iso { location } => location,
            Source::ContainerImage { reference } => reference,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootMode {
    Efi,
    Legacy,
}

/// Requested output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutputFormat {
    Raw,
    Gce,
    Vhd,
    MbrRaw,
    Arm,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Raw => "raw",
            OutputFormat::Gce => "gce",
            OutputFormat::Vhd => "vhd",
            OutputFormat::MbrRaw => "mbr-raw",
            OutputFormat::Arm => "arm",
        };
        f.write_str(name)
    }
}

/// Loop-device serialisation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    pub lock_file: PathBuf,
    pub timeout: Duration,
}

pub const DEFAULT_LOOP_LOCK_FILE: &str = "/run/lock/disk-builder-loop.lock";
pub const DEFAULT_LOOP_TIMEOUT: Duration = Duration::from_secs(600);

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            lock_file: PathBuf::from(DEFAULT_LOOP_LOCK_FILE),
            timeout: DEFAULT_LOOP_TIMEOUT,
        }
    }
}

/// External ARM image builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArmSettings {
    pub model: Option<String>,
    pub builder: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub source: Source,
    /// Working directory for intermediate files.
    pub state_dir: PathBuf,
    /// Where finished artifacts are written.
    pub output_dir: PathBuf,
    pub boot_mode: BootMode,
    pub formats: BTreeSet<OutputFormat>,
    /// Naming fields; complete for ISO sources, possibly partial for
    /// container sources until the image's release file is read.
    pub artifact: ArtifactHints,
    pub disable_http_server: bool,
    pub disable_netboot: bool,
    /// Copied into the data partition as `oem/90_custom.yaml`.
    pub cloud_config: Option<PathBuf>,
    /// Extra space added to the data partition, in MiB.
    pub extra_size_mb: u64,
    /// Write `<artifact>.sha256` next to every output.
    pub checksums: bool,
    pub loop_device: LoopSettings,
    pub arm: ArmSettings,
}

impl BuildOptions {
    pub fn wants(&self, format: OutputFormat) -> bool {
        self.formats.contains(&format)
    }

    /// Working directory for intermediate files.
    pub fn work_dir(&self) -> PathBuf {
        self.state_dir.join("work")
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.source.location().trim().is_empty() {
            return Err(BuildError::config("no source location set"));
        }
        if self.formats.is_empty() {
            return Err(BuildError::config(
                "no output format requested (set one of disk.raw, disk.gce, disk.vhd, disk.mbr, disk.arm)",
            ));
        }

        let mbr = self.wants(OutputFormat::MbrRaw);
        match (self.boot_mode, mbr) {
            (BootMode::Legacy, false) => {
                return Err(BuildError::config(
                    "legacy boot mode requires the mbr output (disk.mbr=true)",
                ))
            }
            (BootMode::Efi, true) => {
                return Err(BuildError::config(
                    "mbr output requested with EFI boot mode",
                ))
            }
            _ => {}
        }

        if self.source.is_iso() {
            self.artifact.resolve().map_err(|missing| {
                BuildError::config(format!(
                    "ISO source requires naming fields: {}",
                    missing.join(", ")
                ))
            })?;
        }

        if self.wants(OutputFormat::Arm) && self.arm.builder.is_none() {
            return Err(BuildError::config(
                "disk.arm requires arm.builder to name the ARM image builder",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn iso_options(state_dir: PathBuf, formats: &[OutputFormat]) -> BuildOptions {
        let boot_mode = if formats.contains(&OutputFormat::MbrRaw) {
            BootMode::Legacy
        } else {
            BootMode::Efi
        };
        BuildOptions {
            source: Source::Iso {
                location: "https://example.invalid/kairos.squashfs".into(),
            },
            output_dir: state_dir.clone(),
            state_dir,
            boot_mode,
            formats: formats.iter().copied().collect(),
            artifact: ArtifactHints {
                flavor: Some("rockylinux".into()),
                flavor_release: Some("9".into()),
                arch: Some("amd64".into()),
                variant: Some("generic".into()),
                version: Some("v3.2.1".into()),
            },
            disable_http_server: true,
            disable_netboot: true,
            cloud_config: None,
            extra_size_mb: 0,
            checksums: false,
            loop_device: LoopSettings::default(),
            arm: ArmSettings::default(),
        }
    }

    pub(crate) fn container_options(
        state_dir: PathBuf,
        formats: &[OutputFormat],
    ) -> BuildOptions {
        let mut opts = iso_options(state_dir, formats);
        opts.source = Source::ContainerImage {
            reference: "docker://quay.io/kairos/opensuse:tumbleweed-core-amd64-generic-v3.2.1"
                .into(),
        };
        opts.artifact = ArtifactHints::default();
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn valid_iso_options_pass() {
        let opts = iso_options("/tmp/state".into(), &[OutputFormat::Raw]);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn empty_formats_rejected() {
        let opts = iso_options("/tmp/state".into(), &[]);
        let err = opts.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn boot_mode_must_match_mbr_format() {
        let mut opts = iso_options("/tmp/state".into(), &[OutputFormat::Raw]);
        opts.boot_mode = BootMode::Legacy;
        assert!(opts.validate().is_err());

        let mut opts = iso_options("/tmp/state".into(), &[OutputFormat::MbrRaw]);
        opts.boot_mode = BootMode::Efi;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn iso_source_needs_naming_fields() {
        let mut opts = iso_options("/tmp/state".into(), &[OutputFormat::Raw]);
        opts.artifact.flavor = None;
        let err = opts.validate().unwrap_err().to_string();
        assert!(err.contains("flavor"));
    }

    #[test]
    fn container_source_may_defer_naming() {
        let opts = container_options("/tmp/state".into(), &[OutputFormat::Gce]);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn arm_requires_builder() {
        let mut opts = container_options("/tmp/state".into(), &[OutputFormat::Arm]);
        assert!(opts.validate().is_err());
        opts.arm.builder = Some("/usr/local/bin/build-arm".into());
        assert!(opts.validate().is_ok());
    }
}
