//! Build pipeline.
//!
//! [`Pipeline::build`] selects stages from the fixed master table by
//! evaluating each stage's predicate against the [`BuildOptions`]; the
//! [`Executor`] runs them strictly in order, recording an [`AuditTrail`]
//! and stopping at the first failure. [`execute`] does both and persists
//! the run manifest.
//!
//! [`BuildOptions`]: crate::options::BuildOptions

mod actions;
pub mod builder;
pub mod context;
pub mod executor;
pub mod manifest;
pub mod stage;

pub use builder::Pipeline;
pub use context::{ArmImager, ArmRequest, CommandArmImager, StageContext, Toolchain};
pub use executor::{execute, AuditTrail, Executor, RunReport, StageOutcome, StageRecord};
pub use manifest::{RunManifest, RunStatus};
pub use stage::{Stage, StageId, MASTER_STAGES};
