//! Build configuration.
//!
//! A TOML file plus repeated `key=value` overrides with dotted keys
//! (`disk.gce=true`). Overrides are applied to the parsed table before it is
//! deserialized, so they go through the same validation as file values.
//!
//! ```toml
//! container_image = "quay.io/kairos/opensuse:tumbleweed-core-amd64-generic-v3.2.1"
//! state_dir = "/var/lib/disk-builder"
//!
//! [disk]
//! raw = true
//! vhd = true
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::artifact::naming::ArtifactHints;
use crate::error::BuildError;
use crate::options::{
    ArmSettings, BootMode, BuildOptions, LoopSettings, OutputFormat, Source,
    DEFAULT_LOOP_LOCK_FILE, DEFAULT_LOOP_TIMEOUT,
};
use crate::rootfs::container::normalize_reference;
use crate::rootfs::squashfs::{release_url, DEFAULT_REPOSITORY};

pub const DEFAULT_STATE_DIR: &str = "/tmp/auroraboot";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BuildConfig {
    pub state_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub container_image: Option<String>,
    pub squashfs_url: Option<String>,
    pub repository: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub release_version: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub artifact_version: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub flavor: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub flavor_release: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub arch: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub variant: Option<String>,
    pub disable_http_server: bool,
    pub disable_netboot: bool,
    pub cloud_config: Option<PathBuf>,
    pub disk: DiskConfig,
    pub arm: ArmConfig,
    #[serde(rename = "loop")]
    pub loop_device: LoopConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DiskConfig {
    pub raw: bool,
    pub gce: bool,
    pub vhd: bool,
    pub mbr: bool,
    pub arm: bool,
    pub extra_size_mb: u64,
    pub checksums: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ArmConfig {
    pub model: Option<String>,
    pub builder: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoopConfig {
    pub lock_file: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

impl BuildConfig {
    /// Load `path` (if any) and apply `overrides` on top.
    pub fn load(path: Option<&Path>, overrides: &[String]) -> Result<BuildConfig> {
        let mut table = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading config '{}'", path.display()))?;
                toml::from_str::<toml::Table>(&text)
                    .with_context(|| format!("parsing config '{}'", path.display()))?
            }
            None => toml::Table::new(),
        };

        for raw in overrides {
            apply_override(&mut table, raw)
                .with_context(|| format!("invalid override '{raw}'"))?;
        }

        toml::Value::Table(table)
            .try_into::<BuildConfig>()
            .context("invalid configuration")
    }

    fn hints(&self) -> ArtifactHints {
        ArtifactHints {
            flavor: self.flavor.clone(),
            flavor_release: self.flavor_release.clone(),
            arch: self.arch.clone(),
            variant: self.variant.clone(),
            version: self.artifact_version.clone(),
        }
    }

    fn formats(&self) -> BTreeSet<OutputFormat> {
        [
            (self.disk.raw, OutputFormat::Raw),
            (self.disk.gce, OutputFormat::Gce),
            (self.disk.vhd, OutputFormat::Vhd),
            (self.disk.mbr, OutputFormat::MbrRaw),
            (self.disk.arm, OutputFormat::Arm),
        ]
        .into_iter()
        .filter_map(|(on, format)| on.then_some(format))
        .collect()
    }

    fn source(&self, hints: &ArtifactHints) -> Result<Source, BuildError> {
        match (&self.container_image, &self.squashfs_url) {
            (Some(_), Some(_)) => Err(BuildError::config(
                "container_image and squashfs_url are mutually exclusive",
            )),
            (Some(image), None) => Ok(Source::ContainerImage {
                reference: normalize_reference(image),
            }),
            (None, Some(url)) => Ok(Source::Iso {
                location: url.clone(),
            }),
            (None, None) => {
                let info = hints.resolve().map_err(|missing| {
                    BuildError::config(format!(
                        "no container_image or squashfs_url set, and the release URL cannot be derived (missing: {})",
                        missing.join(", ")
                    ))
                })?;
                let release = self
                    .release_version
                    .as_deref()
                    .unwrap_or(info.version.as_str());
                Ok(Source::Iso {
                    location: release_url(
                        self.repository.as_deref().unwrap_or(DEFAULT_REPOSITORY),
                        release,
                        &info.name(),
                    ),
                })
            }
        }
    }

    /// Normalise into validated [`BuildOptions`].
    pub fn into_options(self) -> Result<BuildOptions, BuildError> {
        let hints = self.hints();
        let source = self.source(&hints)?;
        let state_dir = self
            .state_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        let output_dir = self.output_dir.clone().unwrap_or_else(|| state_dir.clone());
        let boot_mode = if self.disk.mbr {
            BootMode::Legacy
        } else {
            BootMode::Efi
        };

        let options = BuildOptions {
            source,
            state_dir,
            output_dir,
            boot_mode,
            formats: self.formats(),
            artifact: hints,
            disable_http_server: self.disable_http_server,
            disable_netboot: self.disable_netboot,
            cloud_config: self.cloud_config,
            extra_size_mb: self.disk.extra_size_mb,
            checksums: self.disk.checksums,
            loop_device: LoopSettings {
                lock_file: self
                    .loop_device
                    .lock_file
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOOP_LOCK_FILE)),
                timeout: self
                    .loop_device
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_LOOP_TIMEOUT),
            },
            arm: ArmSettings {
                model: self.arm.model,
                builder: self.arm.builder,
            },
        };
        options.validate()?;
        Ok(options)
    }
}

/// Accept numbers where a string is expected: `flavor_release = 9` and
/// `--set flavor_release=9` both mean `"9"`.
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Str(String),
        Int(i64),
        Float(f64),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|v| match v {
        Scalar::Str(s) => s,
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
    }))
}

fn parse_value(raw: &str) -> toml::Value {
    match raw {
        "true" => toml::Value::Boolean(true),
        "false" => toml::Value::Boolean(false),
        _ => raw
            .parse::<i64>()
            .map(toml::Value::Integer)
            .unwrap_or_else(|_| toml::Value::String(raw.to_string())),
    }
}

fn apply_override(table: &mut toml::Table, raw: &str) -> Result<()> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected key=value");
    };
    let parts: Vec<&str> = key.trim().split('.').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        bail!("empty key segment in '{}'", key);
    }

    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| anyhow::anyhow!("empty key"))?;
    let mut current = table;
    for part in parents {
        let entry = current
            .entry(part.to_string())
            .or_insert(toml::Value::Table(toml::Table::new()));
        current = match entry {
            toml::Value::Table(t) => t,
            _ => bail!("'{}' is not a table", part),
        };
    }
    current.insert(last.to_string(), parse_value(value.trim()));
    Ok(())
}
