//! Artifact naming.
//!
//! EFI-mode raw images are named from the artifact metadata:
//! `kairos-<flavor>-<flavor_release>-core-<arch>-<variant>-<version>.raw`.
//! Legacy/MBR raw images are always written as `disk.raw`, whatever the
//! metadata says. That split is long-standing product behavior and is kept
//! as is. Converted outputs append their suffix to the raw file name.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::options::BootMode;

/// Fixed raw image name on the MBR path.
pub const MBR_RAW_NAME: &str = "disk.raw";

/// Release file inside the root filesystem carrying the naming fields.
pub const RELEASE_FILE: &str = "etc/kairos-release";

const DEFAULT_ARCH: &str = "amd64";
const DEFAULT_VARIANT: &str = "generic";

/// Naming fields as configured or read from an image, possibly incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactHints {
    pub flavor: Option<String>,
    pub flavor_release: Option<String>,
    pub arch: Option<String>,
    pub variant: Option<String>,
    pub version: Option<String>,
}

/// Complete naming fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub flavor: String,
    pub flavor_release: String,
    pub arch: String,
    pub variant: String,
    pub version: String,
}

impl ArtifactHints {
    /// Fill every unset field from `fallback`.
    pub fn or(self, fallback: &ArtifactHints) -> ArtifactHints {
        ArtifactHints {
            flavor: self.flavor.or_else(|| fallback.flavor.clone()),
            flavor_release: self
                .flavor_release
                .or_else(|| fallback.flavor_release.clone()),
            arch: self.arch.or_else(|| fallback.arch.clone()),
            variant: self.variant.or_else(|| fallback.variant.clone()),
            version: self.version.or_else(|| fallback.version.clone()),
        }
    }

    /// Resolve into complete metadata.
    ///
    /// `arch` and `variant` fall back to `amd64` and `generic`. On failure
    /// returns the names of the missing required fields.
    pub fn resolve(&self) -> std::result::Result<ArtifactInfo, Vec<&'static str>> {
        let mut missing = Vec::new();
        let mut take = |value: &Option<String>, name: &'static str| -> String {
            match value.as_deref().map(str::trim) {
                Some(v) if !v.is_empty() => v.to_string(),
                _ => {
                    missing.push(name);
                    String::new()
                }
            }
        };
        let flavor = take(&self.flavor, "flavor");
        let flavor_release = take(&self.flavor_release, "flavor_release");
        let version = take(&self.version, "artifact_version");
        if !missing.is_empty() {
            return Err(missing);
        }
        Ok(ArtifactInfo {
            flavor,
            flavor_release,
            arch: non_empty(&self.arch).unwrap_or(DEFAULT_ARCH).to_string(),
            variant: non_empty(&self.variant)
                .unwrap_or(DEFAULT_VARIANT)
                .to_string(),
            version,
        })
    }

    /// Read naming fields from an os-release style file.
    pub fn from_release_file(path: &Path) -> Result<ArtifactHints> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading release file '{}'", path.display()))?;
        Ok(Self::from_release_content(&content))
    }

    pub fn from_release_content(content: &str) -> ArtifactHints {
        let values = parse_os_release(content);
        let get = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| values.get(*k))
                .filter(|v| !v.is_empty())
                .cloned()
        };
        ArtifactHints {
            flavor: get(&["KAIROS_FLAVOR"]),
            flavor_release: get(&["KAIROS_FLAVOR_RELEASE"]),
            arch: get(&["KAIROS_ARCH", "KAIROS_TARGETARCH"]),
            variant: get(&["KAIROS_MODEL"]),
            version: get(&["KAIROS_VERSION"]),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_os_release(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                .unwrap_or(v);
            (k.trim().to_string(), v.to_string())
        })
        .collect()
}

impl ArtifactInfo {
    /// Base artifact name without extension.
    pub fn name(&self) -> String {
        format!(
            "kairos-{}-{}-core-{}-{}-{}",
            self.flavor, self.flavor_release, self.arch, self.variant, self.version
        )
    }
}

/// File name of the raw disk image for a boot mode.
pub fn raw_disk_name(boot_mode: BootMode, info: &ArtifactInfo) -> String {
    match boot_mode {
        BootMode::Efi => format!("{}.raw", info.name()),
        BootMode::Legacy => MBR_RAW_NAME.to_string(),
    }
}

/// File name of a converted output derived from the raw image.
pub fn converted_name(raw: &Path, suffix: &str) -> String {
    let base = raw
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| MBR_RAW_NAME.to_string());
    format!("{base}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ArtifactInfo {
        ArtifactInfo {
            flavor: "rockylinux".into(),
            flavor_release: "9".into(),
            arch: "amd64".into(),
            variant: "generic".into(),
            version: "v3.2.1".into(),
        }
    }

    #[test]
    fn efi_raw_name_follows_template() {
        assert_eq!(
            raw_disk_name(BootMode::Efi, &info()),
            "kairos-rockylinux-9-core-amd64-generic-v3.2.1.raw"
        );
    }

    #[test]
    fn mbr_raw_name_ignores_metadata() {
        let mut other = info();
        other.flavor = "ubuntu".into();
        other.version = "v9.9.9".into();
        assert_eq!(raw_disk_name(BootMode::Legacy, &info()), "disk.raw");
        assert_eq!(raw_disk_name(BootMode::Legacy, &other), "disk.raw");
    }

    #[test]
    fn converted_names_append_suffix() {
        let raw = Path::new("/out/kairos-rockylinux-9-core-amd64-generic-v3.2.1.raw");
        assert_eq!(
            converted_name(raw, ".gce.tar.gz"),
            "kairos-rockylinux-9-core-amd64-generic-v3.2.1.raw.gce.tar.gz"
        );
        assert_eq!(converted_name(Path::new("disk.raw"), ".vhd"), "disk.raw.vhd");
    }

    #[test]
    fn resolve_applies_defaults_and_reports_missing() {
        let hints = ArtifactHints {
            flavor: Some("opensuse".into()),
            flavor_release: Some("tumbleweed".into()),
            version: Some("v3.2.1".into()),
            ..Default::default()
        };
        let resolved = hints.resolve().unwrap();
        assert_eq!(resolved.arch, "amd64");
        assert_eq!(resolved.variant, "generic");

        let missing = ArtifactHints::default().resolve().unwrap_err();
        assert_eq!(missing, vec!["flavor", "flavor_release", "artifact_version"]);
    }

    #[test]
    fn release_file_fields_are_parsed() {
        let content = r#"
# generated at image build time
KAIROS_NAME="kairos-core-opensuse-tumbleweed"
KAIROS_FLAVOR="opensuse"
KAIROS_FLAVOR_RELEASE="tumbleweed"
KAIROS_TARGETARCH="amd64"
KAIROS_MODEL="generic"
KAIROS_VERSION='v3.2.1'
"#;
        let hints = ArtifactHints::from_release_content(content);
        assert_eq!(
            hints.resolve().unwrap().name(),
            "kairos-opensuse-tumbleweed-core-amd64-generic-v3.2.1"
        );
    }

    #[test]
    fn image_fields_take_precedence_over_configured() {
        let from_image = ArtifactHints {
            flavor: Some("opensuse".into()),
            ..Default::default()
        };
        let configured = ArtifactHints {
            flavor: Some("ubuntu".into()),
            flavor_release: Some("24.04".into()),
            version: Some("v1.0.0".into()),
            ..Default::default()
        };
        let merged = from_image.or(&configured);
        assert_eq!(merged.flavor.as_deref(), Some("opensuse"));
        assert_eq!(merged.flavor_release.as_deref(), Some("24.04"));
    }
}
