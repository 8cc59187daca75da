//! Sequential stage execution with an audit trail.
//!
//! Every stage is recorded in the trail before its action runs. The first
//! failure stops the run; later stages are never entered, so absence from
//! the trail means "never started" and a `failed` record means "started and
//! failed".

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

use super::builder::Pipeline;
use super::context::{StageContext, Toolchain};
use super::manifest::{self, RunManifest, RunStatus};
use super::stage::StageId;
use crate::error::BuildError;
use crate::options::BuildOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Entered; action still running or the process died inside it.
    Entered,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageId,
    pub outcome: StageOutcome,
    pub duration_ms: u64,
}

/// Stages entered during one run, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditTrail {
    records: Vec<StageRecord>,
}

impl AuditTrail {
    fn enter(&mut self, stage: StageId) {
        self.records.push(StageRecord {
            stage,
            outcome: StageOutcome::Entered,
            duration_ms: 0,
        });
    }

    fn finish(&mut self, outcome: StageOutcome, started: Instant) {
        if let Some(last) = self.records.last_mut() {
            last.outcome = outcome;
            last.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        }
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn entered(&self) -> Vec<StageId> {
        self.records.iter().map(|r| r.stage).collect()
    }

    pub fn contains(&self, stage: StageId) -> bool {
        self.records.iter().any(|r| r.stage == stage)
    }

    pub fn outcome(&self, stage: StageId) -> Option<StageOutcome> {
        self.records
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| r.outcome)
    }
}

/// Result of a run: what was entered, what was produced, how it ended.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub trail: AuditTrail,
    pub outputs: Vec<PathBuf>,
    pub result: Result<(), BuildError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs a selected pipeline against one set of options.
pub struct Executor<'a> {
    options: &'a BuildOptions,
    toolchain: &'a Toolchain,
}

impl<'a> Executor<'a> {
    pub fn new(options: &'a BuildOptions, toolchain: &'a Toolchain) -> Self {
        Self { options, toolchain }
    }

    pub fn run(&self, pipeline: &Pipeline) -> RunReport {
        let mut ctx = StageContext::new(self.options, self.toolchain);
        let mut trail = AuditTrail::default();
        let mut result = Ok(());

        for stage in pipeline.stages() {
            tracing::info!(stage = %stage.id, "entering stage");
            trail.enter(stage.id);
            let started = Instant::now();

            match (stage.run)(&mut ctx) {
                Ok(()) => trail.finish(StageOutcome::Succeeded, started),
                Err(source) => {
                    trail.finish(StageOutcome::Failed, started);
                    tracing::error!(stage = %stage.id, error = %format!("{source:#}"), "stage failed");
                    result = Err(BuildError::Stage {
                        stage: stage.id,
                        source,
                    });
                    break;
                }
            }
        }

        RunReport {
            run_id: manifest::new_run_id(),
            trail,
            outputs: ctx.outputs,
            result,
        }
    }
}

/// Select and run the stages for `options`, then persist the run manifest
/// under the state directory.
pub fn execute(options: &BuildOptions, toolchain: &Toolchain) -> RunReport {
    let created_at_utc = manifest::now_utc();

    let report = match Pipeline::build(options) {
        Ok(pipeline) => {
            let ids: Vec<&str> = pipeline.ids().iter().map(|id| id.as_str()).collect();
            tracing::info!(stages = ?ids, "pipeline selected");
            Executor::new(options, toolchain).run(&pipeline)
        }
        Err(err) => RunReport {
            run_id: manifest::new_run_id(),
            trail: AuditTrail::default(),
            outputs: Vec::new(),
            result: Err(err),
        },
    };

    let record = RunManifest {
        run_id: report.run_id.clone(),
        status: if report.is_success() {
            RunStatus::Success
        } else {
            RunStatus::Failed
        },
        created_at_utc,
        finished_at_utc: Some(manifest::now_utc()),
        stages: report.trail.records().to_vec(),
        error: report.result.as_ref().err().map(|e| e.to_string()),
        outputs: report.outputs.clone(),
    };
    let path = manifest::manifest_path(&options.state_dir);
    if let Err(err) = manifest::write_manifest(&path, &record) {
        tracing::warn!(error = %format!("{err:#}"), "could not write run manifest");
    }

    report
}
