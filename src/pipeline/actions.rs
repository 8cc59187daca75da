//! Stage actions.
//!
//! Each action reads what earlier stages left in the [`StageContext`] and
//! records what it produced. Missing precursors are format invariant
//! violations, not panics.

use anyhow::{Context, Result};
use std::path::PathBuf;

use super::context::{ArmRequest, StageContext};
use crate::artifact::disk::{DiskRequest, RawDiskImage};
use crate::artifact::naming::{self, ArtifactHints, ArtifactInfo};
use crate::artifact::{gce, vhd};
use crate::error::BuildError;
use crate::options::{BootMode, Source};
use crate::rootfs::Rootfs;

fn rootfs_dir(ctx: &StageContext<'_>) -> PathBuf {
    ctx.options.work_dir().join("rootfs")
}

fn require_rootfs<'c>(ctx: &'c StageContext<'_>) -> Result<&'c Rootfs> {
    ctx.rootfs
        .as_ref()
        .ok_or_else(|| BuildError::FormatInvariant("no root filesystem available".into()).into())
}

fn require_artifact<'c>(ctx: &'c StageContext<'_>) -> Result<&'c ArtifactInfo> {
    ctx.artifact
        .as_ref()
        .ok_or_else(|| BuildError::FormatInvariant("artifact naming is unresolved".into()).into())
}

fn require_raw_disk<'c>(ctx: &'c StageContext<'_>) -> Result<&'c RawDiskImage> {
    ctx.raw_disk.as_ref().ok_or_else(|| {
        BuildError::FormatInvariant("no raw disk image was produced by this run".into()).into()
    })
}

fn resolve_artifact(hints: &ArtifactHints) -> Result<ArtifactInfo> {
    hints.resolve().map_err(|missing| {
        BuildError::config(format!(
            "artifact naming fields missing: {}",
            missing.join(", ")
        ))
        .into()
    })
}

pub fn download_squashfs(ctx: &mut StageContext<'_>) -> Result<()> {
    let Source::Iso { location } = &ctx.options.source else {
        anyhow::bail!("download-squashfs requires an ISO source");
    };
    let path = ctx
        .toolchain
        .rootfs
        .fetch_squashfs(location, &ctx.options.work_dir())
        .with_context(|| format!("fetching squashfs from {location}"))?;
    ctx.squashfs = Some(path);
    Ok(())
}

pub fn extract_squashfs(ctx: &mut StageContext<'_>) -> Result<()> {
    let squashfs = ctx.squashfs.clone().ok_or_else(|| {
        BuildError::FormatInvariant("no squashfs was downloaded by this run".into())
    })?;
    let rootfs = ctx
        .toolchain
        .rootfs
        .extract_squashfs(&squashfs, &rootfs_dir(ctx))
        .with_context(|| format!("extracting {}", squashfs.display()))?;
    ctx.artifact = Some(resolve_artifact(&ctx.options.artifact)?);
    ctx.rootfs = Some(rootfs);
    Ok(())
}

pub fn dump_source(ctx: &mut StageContext<'_>) -> Result<()> {
    let Source::ContainerImage { reference } = &ctx.options.source else {
        anyhow::bail!("dump-source requires a container image source");
    };
    let rootfs = ctx
        .toolchain
        .rootfs
        .dump_container(reference, &rootfs_dir(ctx))
        .with_context(|| format!("exporting container image {reference}"))?;

    let release = rootfs.path.join(naming::RELEASE_FILE);
    let hints = if release.is_file() {
        ArtifactHints::from_release_file(&release)?.or(&ctx.options.artifact)
    } else {
        tracing::warn!(file = %release.display(), "image has no release file; using configured naming");
        ctx.options.artifact.clone()
    };
    let info = resolve_artifact(&hints)?;
    tracing::info!(artifact = %info.name(), "resolved artifact name from image");

    ctx.artifact = Some(info);
    ctx.rootfs = Some(rootfs);
    Ok(())
}

fn build_disk(ctx: &mut StageContext<'_>, boot_mode: BootMode) -> Result<()> {
    let rootfs = require_rootfs(ctx)?;
    let info = require_artifact(ctx)?;
    let request = DiskRequest {
        rootfs: rootfs.path.clone(),
        rootfs_size: rootfs.size_bytes,
        output: ctx
            .options
            .output_dir
            .join(naming::raw_disk_name(boot_mode, info)),
        boot_mode,
        arch: info.arch.clone(),
        extra_size_mb: ctx.options.extra_size_mb,
        cloud_config: ctx.options.cloud_config.clone(),
        work_dir: ctx.options.work_dir(),
    };

    let image = ctx.toolchain.disk.build(&request)?;
    ctx.record_output(&image.path)?;
    ctx.raw_disk = Some(image);
    Ok(())
}

pub fn gen_raw_disk(ctx: &mut StageContext<'_>) -> Result<()> {
    tracing::info!("Generating raw disk");
    build_disk(ctx, BootMode::Efi)
}

pub fn gen_raw_mbr_disk(ctx: &mut StageContext<'_>) -> Result<()> {
    tracing::info!("Generating MBR disk");
    build_disk(ctx, BootMode::Legacy)
}

pub fn build_arm_image(ctx: &mut StageContext<'_>) -> Result<()> {
    let rootfs = require_rootfs(ctx)?;
    let info = require_artifact(ctx)?;
    let request = ArmRequest {
        rootfs: rootfs.path.clone(),
        model: ctx.options.arm.model.clone(),
        output: ctx.options.output_dir.join(format!("{}.img", info.name())),
    };
    tracing::info!(output = %request.output.display(), "building ARM image");
    let image = ctx.toolchain.arm.build(&request)?;
    ctx.record_output(&image)
}

pub fn convert_gce(ctx: &mut StageContext<'_>) -> Result<()> {
    let raw = require_raw_disk(ctx)?.path.clone();
    let archive = gce::convert(&raw, &ctx.options.output_dir)?;
    ctx.record_output(&archive)
}

pub fn convert_vhd(ctx: &mut StageContext<'_>) -> Result<()> {
    let raw = require_raw_disk(ctx)?.path.clone();
    let image = vhd::convert(&raw, &ctx.options.output_dir)?;
    ctx.record_output(&image)
}
