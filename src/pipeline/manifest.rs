//! Run manifest persisted after every run.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::executor::StageRecord;

const RUN_MANIFEST_FILENAME: &str = "run-manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub status: RunStatus,
    pub created_at_utc: String,
    pub finished_at_utc: Option<String>,
    /// Entered stages only, in execution order.
    pub stages: Vec<StageRecord>,
    pub error: Option<String>,
    pub outputs: Vec<PathBuf>,
}

pub fn manifest_path(state_dir: &Path) -> PathBuf {
    state_dir.join(RUN_MANIFEST_FILENAME)
}

pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Current UTC time as RFC 3339.
pub fn now_utc() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

pub fn write_manifest(path: &Path, manifest: &RunManifest) -> Result<()> {
    write_json_atomic(path, manifest)
        .with_context(|| format!("writing run manifest '{}'", path.display()))
}

pub fn load_manifest(path: &Path) -> Result<RunManifest> {
    let bytes =
        fs::read(path).with_context(|| format!("reading run manifest '{}'", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing run manifest '{}'", path.display()))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path without parent '{}'", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("creating parent directory '{}'", parent.display()))?;
    let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
    let payload = serde_json::to_vec_pretty(value).context("serializing run manifest")?;
    fs::write(&tmp, payload).with_context(|| format!("writing temp file '{}'", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "renaming temp file '{}' to '{}'",
            tmp.display(),
            path.display()
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::executor::StageOutcome;
    use crate::pipeline::StageId;

    #[test]
    fn manifest_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = RunManifest {
            run_id: new_run_id(),
            status: RunStatus::Failed,
            created_at_utc: now_utc(),
            finished_at_utc: Some(now_utc()),
            stages: vec![
                StageRecord {
                    stage: StageId::DumpSource,
                    outcome: StageOutcome::Succeeded,
                    duration_ms: 12,
                },
                StageRecord {
                    stage: StageId::GenRawDisk,
                    outcome: StageOutcome::Failed,
                    duration_ms: 3,
                },
            ],
            error: Some("stage 'gen-raw-disk' failed: no slot".into()),
            outputs: vec![],
        };
        let path = manifest_path(dir.path());
        write_manifest(&path, &manifest).unwrap();
        assert_eq!(load_manifest(&path).unwrap(), manifest);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"status\": \"failed\""));
        assert!(raw.contains("\"stage\": \"gen-raw-disk\""));
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let ts = now_utc();
        assert!(OffsetDateTime::parse(&ts, &Rfc3339).is_ok());
    }
}
