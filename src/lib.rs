//! Disk image builder for Kairos-style appliance images.
//!
//! Turns a bootable source (a release squashfs or a container image) into
//! raw, GCE, VHD, MBR and ARM disk images.
//!
//! - **Pipeline** - Stage selection from a fixed master table, sequential
//!   execution with an audit trail and a persisted run manifest
//! - **Root filesystem** - Squashfs download/extract and container export
//! - **Disk builder** - Partitioning, formatting and bootloader install on a
//!   serialised loop device
//! - **Converters** - GCE tarballs and fixed VHDs from a finished raw image
//! - **Preflight checks** - Host tool validation before builds
//!
//! # Architecture
//!
//! ```text
//! BuildConfig (TOML + --set)
//!     │
//!     └── into_options ──> BuildOptions
//!                              │
//!                              ├── Pipeline::build ──> [Stage]
//!                              └── Executor::run
//!                                      │
//!                                      ├── RootfsProvider (squashfs | container)
//!                                      ├── DiskImager ──> LoopManager
//!                                      ├── ArmImager
//!                                      └── gce / vhd converters
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use disk_builder::{config::BuildConfig, pipeline::{execute, Toolchain}};
//!
//! let options = BuildConfig::load(Some(path), &[])?.into_options()?;
//! let report = execute(&options, &Toolchain::host(&options));
//! println!("entered: {:?}", report.trail.entered());
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod loopdev;
pub mod options;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod rootfs;

pub use config::BuildConfig;
pub use error::{BuildError, ErrorKind};
pub use options::{BootMode, BuildOptions, OutputFormat, Source};
pub use pipeline::{execute, Pipeline, RunReport, StageId, Toolchain};
