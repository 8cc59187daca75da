//! State shared by the stages of one run, and the collaborators they call.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::artifact::checksum;
use crate::artifact::disk::{DiskImager, LoopDiskImager, RawDiskImage};
use crate::artifact::naming::ArtifactInfo;
use crate::loopdev::LoopManager;
use crate::options::BuildOptions;
use crate::process::Cmd;
use crate::rootfs::{HostRootfsProvider, Rootfs, RootfsProvider};

/// Input for the external ARM image builder.
#[derive(Debug, Clone)]
pub struct ArmRequest {
    pub rootfs: PathBuf,
    pub model: Option<String>,
    pub output: PathBuf,
}

/// Builds board images for ARM targets.
pub trait ArmImager {
    fn build(&self, request: &ArmRequest) -> Result<PathBuf>;
}

/// Runs a configured builder executable:
/// `<builder> [--model <model>] --rootfs <dir> --output <file>`.
#[derive(Debug, Clone)]
pub struct CommandArmImager {
    builder: Option<PathBuf>,
}

impl CommandArmImager {
    pub fn new(builder: Option<PathBuf>) -> Self {
        Self { builder }
    }
}

impl ArmImager for CommandArmImager {
    fn build(&self, request: &ArmRequest) -> Result<PathBuf> {
        let builder = self
            .builder
            .as_deref()
            .context("no ARM image builder configured (arm.builder)")?;
        let mut cmd = Cmd::new(builder);
        if let Some(model) = &request.model {
            cmd = cmd.args(["--model", model.as_str()]);
        }
        cmd.arg("--rootfs")
            .arg_path(&request.rootfs)
            .arg("--output")
            .arg_path(&request.output)
            .error_msg("ARM image builder failed")
            .run()?;
        Ok(request.output.clone())
    }
}

/// The collaborators stage actions delegate to.
pub struct Toolchain {
    pub rootfs: Box<dyn RootfsProvider>,
    pub disk: Box<dyn DiskImager>,
    pub arm: Box<dyn ArmImager>,
}

impl Toolchain {
    /// Host tools: curl/unsquashfs/skopeo, loop devices, the ARM builder.
    pub fn host(options: &BuildOptions) -> Toolchain {
        Toolchain {
            rootfs: Box::new(HostRootfsProvider::new(options.work_dir())),
            disk: Box::new(LoopDiskImager::new(LoopManager::new(
                options.loop_device.clone(),
            ))),
            arm: Box::new(CommandArmImager::new(options.arm.builder.clone())),
        }
    }
}

/// Mutable state threaded through the stages of one run.
pub struct StageContext<'a> {
    pub options: &'a BuildOptions,
    pub toolchain: &'a Toolchain,
    pub squashfs: Option<PathBuf>,
    pub rootfs: Option<Rootfs>,
    pub artifact: Option<ArtifactInfo>,
    pub raw_disk: Option<RawDiskImage>,
    pub outputs: Vec<PathBuf>,
}

impl<'a> StageContext<'a> {
    pub fn new(options: &'a BuildOptions, toolchain: &'a Toolchain) -> Self {
        Self {
            options,
            toolchain,
            squashfs: None,
            rootfs: None,
            artifact: None,
            raw_disk: None,
            outputs: Vec::new(),
        }
    }

    /// Record a finished artifact, writing its checksum when enabled.
    pub fn record_output(&mut self, path: &Path) -> Result<()> {
        if self.options.checksums {
            checksum::write_sidecar(path)?;
        }
        tracing::info!(artifact = %path.display(), "artifact written");
        self.outputs.push(path.to_path_buf());
        Ok(())
    }
}
