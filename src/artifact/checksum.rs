//! Checksum sidecars.
//!
//! Writes `<artifact>.sha256` in the format `sha256sum -c` accepts:
//! `<hex>  <file name>`.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

const SEPARATOR: &str = "  ";

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write the sidecar next to `artifact` and return its path.
pub fn write_sidecar(artifact: &Path) -> Result<PathBuf> {
    let hash = sha256_file(artifact)?;
    let filename = artifact
        .file_name()
        .context("artifact path has no file name")?
        .to_string_lossy();

    let mut sidecar = artifact.as_os_str().to_os_string();
    sidecar.push(".sha256");
    let sidecar = PathBuf::from(sidecar);

    fs::write(&sidecar, format!("{hash}{SEPARATOR}{filename}\n"))
        .with_context(|| format!("Failed to write {}", sidecar.display()))?;
    tracing::info!(artifact = %artifact.display(), sha256 = %hash, "checksum written");
    Ok(sidecar)
}
