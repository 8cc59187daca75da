//! GCE upload archive.
//!
//! Google Compute Engine imports a gzip-compressed tarball holding a single
//! `disk.raw` entry whose size is a whole number of GiB. The raw image is
//! streamed into the entry followed by zero padding, so neither the source
//! nor the padded image is ever held in memory or written to disk.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};

use super::naming::converted_name;
use super::{atomic_rename, partial_path, precursor_size, round_up, GIB};

/// Suffix appended to the raw file name.
pub const SUFFIX: &str = ".gce.tar.gz";

/// Name of the single archive entry.
pub const ENTRY_NAME: &str = "disk.raw";

/// Convert `raw` into `<output_dir>/<raw name>.gce.tar.gz`.
pub fn convert(raw: &Path, output_dir: &Path) -> Result<PathBuf> {
    let dest = output_dir.join(converted_name(raw, SUFFIX));
    write_archive(raw, &dest, GIB)?;
    Ok(dest)
}

/// Write the archive for `raw` to `dest`, padding the entry to `granularity`.
pub(crate) fn write_archive(raw: &Path, dest: &Path, granularity: u64) -> Result<u64> {
    let size = precursor_size(raw)?;
    let padded = round_up(size, granularity);
    tracing::info!(
        raw = %raw.display(),
        size,
        padded,
        "packaging GCE archive"
    );

    let source = File::open(raw).with_context(|| format!("Failed to open {}", raw.display()))?;
    let body = source
        .take(size)
        .chain(io::repeat(0).take(padded - size));

    let partial = partial_path(dest);
    if let Some(parent) = partial.parent() {
        fs::create_dir_all(parent)?;
    }
    let out = File::create(&partial)
        .with_context(|| format!("Failed to create {}", partial.display()))?;
    let encoder = GzEncoder::new(BufWriter::new(out), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(padded);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    builder
        .append_data(&mut header, ENTRY_NAME, body)
        .context("Failed to stream raw disk into archive")?;

    let encoder = builder.into_inner().context("Failed to finish tar stream")?;
    let mut writer = encoder.finish().context("Failed to finish gzip stream")?;
    io::Write::flush(&mut writer)?;
    writer
        .into_inner()
        .map_err(|e| e.into_error())
        .context("Failed to flush archive")?
        .sync_all()?;

    atomic_rename(&partial, dest)?;
    Ok(padded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    fn entries(archive: &Path) -> Vec<(String, u64, Vec<u8>)> {
        let mut ar = tar::Archive::new(GzDecoder::new(File::open(archive).unwrap()));
        ar.entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let name = e.path().unwrap().to_string_lossy().into_owned();
                let size = e.header().size().unwrap();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (name, size, data)
            })
            .collect()
    }

    #[test]
    fn single_entry_padded_to_granularity() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("disk.raw");
        fs::write(&raw, vec![0xabu8; 5000]).unwrap();
        let dest = dir.path().join("disk.raw.gce.tar.gz");

        let padded = write_archive(&raw, &dest, 4096).unwrap();
        assert_eq!(padded, 8192);

        let found = entries(&dest);
        assert_eq!(found.len(), 1);
        let (name, size, data) = &found[0];
        assert_eq!(name, "disk.raw");
        assert_eq!(*size, 8192);
        assert!(data[..5000].iter().all(|b| *b == 0xab));
        assert!(data[5000..].iter().all(|b| *b == 0));
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn aligned_input_is_not_extended() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("a.raw");
        fs::write(&raw, vec![1u8; 4096]).unwrap();
        let dest = dir.path().join("a.raw.gce.tar.gz");
        assert_eq!(write_archive(&raw, &dest, 4096).unwrap(), 4096);
    }

    #[test]
    fn source_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("disk.raw");
        fs::write(&raw, b"payload").unwrap();
        write_archive(&raw, &dir.path().join("out.tar.gz"), 1024).unwrap();
        assert_eq!(fs::read(&raw).unwrap(), b"payload");
    }

    #[test]
    fn output_named_after_raw() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("kairos-opensuse-tumbleweed-core-amd64-generic-v3.2.1.raw");
        let f = File::create(&raw).unwrap();
        f.set_len(1024 * 1024).unwrap();
        let out_dir = dir.path().join("out");

        let dest = convert(&raw, &out_dir).unwrap();
        assert_eq!(
            dest.file_name().unwrap().to_string_lossy(),
            "kairos-opensuse-tumbleweed-core-amd64-generic-v3.2.1.raw.gce.tar.gz"
        );
        let mut ar = tar::Archive::new(GzDecoder::new(File::open(&dest).unwrap()));
        let mut it = ar.entries().unwrap();
        let first = it.next().unwrap().unwrap();
        assert_eq!(first.header().size().unwrap(), GIB);
        drop(first);
        assert!(it.next().is_none());
    }

    #[test]
    fn missing_raw_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(convert(&dir.path().join("missing.raw"), dir.path()).is_err());
    }
}
