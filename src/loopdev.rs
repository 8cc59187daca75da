//! Loop device manager.
//!
//! Binding a raw image to a kernel loop device is serialised host-wide by an
//! exclusive advisory lock on a well-known lock file. The lock is taken
//! before `losetup` runs and released only after the device is detached, so
//! concurrent builds (threads or processes) never race for the same slot or
//! see each other's partition nodes.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::BuildError;
use crate::options::LoopSettings;
use crate::process::Cmd;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PARTITION_WAIT: Duration = Duration::from_secs(10);

/// Exclusive hold on the loop-device lock file.
#[derive(Debug)]
pub struct SlotLock {
    file: File,
    path: PathBuf,
}

impl SlotLock {
    /// Wait up to `timeout` for the exclusive lock on `path`.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<SlotLock, BuildError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BuildError::ResourceAcquisition(format!(
                    "cannot create lock directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        // Never unlink the lock file: a waiter could then lock a fresh inode
        // while the old one is still held.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                BuildError::ResourceAcquisition(format!(
                    "cannot open lock file {}: {e}",
                    path.display()
                ))
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            if file.try_lock_exclusive().is_ok() {
                tracing::debug!(lock = %path.display(), "loop slot acquired");
                return Ok(SlotLock {
                    file,
                    path: path.to_path_buf(),
                });
            }
            if Instant::now() >= deadline {
                return Err(BuildError::ResourceAcquisition(format!(
                    "timed out after {}s waiting for loop device lock {}",
                    timeout.as_secs(),
                    path.display()
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for SlotLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        tracing::debug!(lock = %self.path.display(), "loop slot released");
    }
}

/// Hands out loop bindings one at a time.
#[derive(Debug, Clone)]
pub struct LoopManager {
    settings: LoopSettings,
}

impl LoopManager {
    pub fn new(settings: LoopSettings) -> Self {
        Self { settings }
    }

    /// Bind `image` to a free loop device with partition scanning enabled.
    pub fn attach(&self, image: &Path) -> Result<LoopDevice> {
        let lock = SlotLock::acquire(&self.settings.lock_file, self.settings.timeout)?;

        let result = Cmd::new("losetup")
            .args(["--find", "--show", "--partscan"])
            .arg_path(image)
            .allow_fail()
            .run()?;
        if !result.success() {
            return Err(BuildError::ResourceAcquisition(format!(
                "losetup could not bind {}: {}",
                image.display(),
                result.stderr.trim()
            ))
            .into());
        }

        let device = result.stdout.trim();
        if device.is_empty() {
            return Err(BuildError::ResourceAcquisition(
                "losetup returned no device".into(),
            )
            .into());
        }
        tracing::info!(device, image = %image.display(), "loop device attached");

        Ok(LoopDevice {
            device: PathBuf::from(device),
            attached: true,
            _lock: lock,
        })
    }
}

/// A bound loop device. Detached, then unlocked, when dropped.
#[derive(Debug)]
pub struct LoopDevice {
    device: PathBuf,
    attached: bool,
    // Released after the detach in `drop`.
    _lock: SlotLock,
}

impl LoopDevice {
    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Node of partition `index` (1-based), e.g. `/dev/loop3p1`.
    pub fn partition(&self, index: u32) -> PathBuf {
        partition_node(&self.device, index)
    }

    /// Wait until the kernel has created nodes for partitions `1..=count`.
    pub fn wait_for_partitions(&self, count: u32) -> Result<()> {
        let deadline = Instant::now() + PARTITION_WAIT;
        loop {
            if (1..=count).all(|i| self.partition(i).exists()) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                anyhow::bail!(
                    "partition nodes for {} did not appear",
                    self.device.display()
                );
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Detach now and report failures instead of swallowing them.
    pub fn detach(mut self) -> Result<()> {
        self.attached = false;
        Cmd::new("losetup")
            .arg("-d")
            .arg_path(&self.device)
            .error_msg("losetup -d failed")
            .run()
            .with_context(|| format!("detaching {}", self.device.display()))?;
        tracing::info!(device = %self.device.display(), "loop device detached");
        Ok(())
    }
}

impl Drop for LoopDevice {
    fn drop(&mut self) {
        if self.attached {
            let _ = Cmd::new("losetup")
                .arg("-d")
                .arg_path(&self.device)
                .allow_fail()
                .run();
            tracing::debug!(device = %self.device.display(), "loop device detached on drop");
        }
    }
}

fn partition_node(device: &Path, index: u32) -> PathBuf {
    let mut s = device.as_os_str().to_os_string();
    s.push(format!("p{index}"));
    PathBuf::from(s)
}
