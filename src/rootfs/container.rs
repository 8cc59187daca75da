//! Container image export.
//!
//! `skopeo copy <ref> dir:<layout>` materialises the image as a manifest
//! plus one blob per layer. Layers are then applied in manifest order onto
//! the rootfs directory, honouring OCI whiteouts:
//!
//! - `.wh.<name>` removes `<name>` from lower layers
//! - `.wh..wh..opq` clears the directory it sits in

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use super::reset_dir;
use crate::process::{self, Cmd};

const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";
const WHITEOUT_PREFIX: &str = ".wh.";

const TRANSPORTS: &[&str] = &[
    "docker://",
    "docker-archive:",
    "docker-daemon:",
    "oci:",
    "oci-archive:",
    "dir:",
    "containers-storage:",
];

/// Prefix `docker://` unless the reference already names a transport.
pub fn normalize_reference(reference: &str) -> String {
    if TRANSPORTS.iter().any(|t| reference.starts_with(t)) {
        reference.to_string()
    } else {
        format!("docker://{reference}")
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Gzip,
    Zstd,
    None,
}

fn detect_compression(magic: &[u8]) -> Compression {
    if magic.starts_with(&[0x1f, 0x8b]) {
        Compression::Gzip
    } else if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
        Compression::Zstd
    } else {
        Compression::None
    }
}

/// Export `reference` into `dest` using `work_dir` for the image layout.
pub fn dump(reference: &str, dest: &Path, work_dir: &Path) -> Result<()> {
    let reference = normalize_reference(reference);
    let layout = work_dir.join(format!("image-{}", uuid::Uuid::new_v4().simple()));
    fs::create_dir_all(&layout)?;
    tracing::info!(image = %reference, layout = %layout.display(), "copying container image");

    let result = Cmd::new("skopeo")
        .arg("copy")
        .arg(&reference)
        .arg(format!("dir:{}", layout.display()))
        .error_msg("skopeo copy failed")
        .run()
        .and_then(|_| unpack_image_dir(&layout, dest));

    let _ = fs::remove_dir_all(&layout);
    result
}

/// Apply every layer of a `dir:` image layout onto `dest`.
pub fn unpack_image_dir(layout: &Path, dest: &Path) -> Result<()> {
    let manifest_path = layout.join("manifest.json");
    let manifest: Manifest = serde_json::from_slice(
        &fs::read(&manifest_path)
            .with_context(|| format!("Failed to read {}", manifest_path.display()))?,
    )
    .context("Failed to parse image manifest")?;
    if manifest.layers.is_empty() {
        bail!("image manifest contains no layers");
    }

    reset_dir(dest)?;
    let total = manifest.layers.len();
    for (i, layer) in manifest.layers.iter().enumerate() {
        let blob = blob_path(layout, &layer.digest);
        tracing::debug!(layer = i + 1, total, digest = %layer.digest, "unpacking layer");
        unpack_blob(&blob, dest)
            .with_context(|| format!("Failed to unpack layer {}", layer.digest))?;
    }
    Ok(())
}

fn blob_path(layout: &Path, digest: &str) -> PathBuf {
    let hex = digest.split_once(':').map(|(_, h)| h).unwrap_or(digest);
    layout.join(hex)
}

fn unpack_blob(blob: &Path, dest: &Path) -> Result<()> {
    let mut magic = [0u8; 4];
    let n = {
        let mut f =
            File::open(blob).with_context(|| format!("Failed to open {}", blob.display()))?;
        f.read(&mut magic)?
    };
    let file = File::open(blob)?;
    match detect_compression(&magic[..n]) {
        Compression::Gzip => unpack_layer(flate2::read::GzDecoder::new(file), dest),
        Compression::Zstd => unpack_layer(zstd::stream::read::Decoder::new(file)?, dest),
        Compression::None => unpack_layer(file, dest),
    }
}

/// Apply one uncompressed layer stream onto `dest`.
///
/// Entry paths are taken relative to `dest` and entries using `..` are
/// skipped. Whiteouts whose parent resolves through a symlink are ignored.
pub fn unpack_layer<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(process::is_root());
    archive.set_unpack_xattrs(true);
    archive.set_overwrite(true);

    for entry in archive.entries().context("Failed to read layer entries")? {
        let mut entry = entry.context("Failed to read layer entry")?;
        let raw_path = entry.path()?.into_owned();
        let Some(path) = layer_relative(&raw_path) else {
            tracing::warn!(path = %raw_path.display(), "skipping layer entry outside the root");
            continue;
        };

        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => {
                entry.unpack_in(dest)?;
                continue;
            }
        };
        let parent = path.parent().unwrap_or(Path::new(""));

        if name == OPAQUE_WHITEOUT {
            if let Some(dir) = contained_dir(dest, parent) {
                if dir.is_dir() {
                    for child in fs::read_dir(&dir)? {
                        remove_path(&child?.path())?;
                    }
                }
            }
            continue;
        }

        if let Some(target) = name.strip_prefix(WHITEOUT_PREFIX) {
            if let Some(dir) = contained_dir(dest, parent) {
                remove_path(&dir.join(target))?;
            }
            continue;
        }

        entry
            .unpack_in(dest)
            .with_context(|| format!("Failed to unpack {}", path.display()))?;
    }
    Ok(())
}

/// `path` relative to the layer root, or `None` if it climbs out of it.
fn layer_relative(path: &Path) -> Option<PathBuf> {
    let mut rel = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => return None,
        }
    }
    Some(rel)
}

/// `dest/rel`, provided no component below `dest` is a symlink.
fn contained_dir(dest: &Path, rel: &Path) -> Option<PathBuf> {
    let mut dir = dest.to_path_buf();
    for part in rel.components() {
        dir.push(part);
        if fs::symlink_metadata(&dir)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
        {
            tracing::warn!(path = %dir.display(), "whiteout parent is a symlink, ignoring");
            return None;
        }
    }
    dir.starts_with(dest).then_some(dir)
}

fn remove_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(_) => {}
    }
    Ok(())
}
