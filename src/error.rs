//! Error kinds surfaced by a build.
//!
//! Stage actions work in `anyhow` and attach context as they go. The
//! executor wraps the first failure in [`BuildError::Stage`] together with
//! the identifier of the stage that produced it. Lower layers raise the
//! typed variants ([`BuildError::ResourceAcquisition`],
//! [`BuildError::FormatInvariant`]) so callers can still tell them apart
//! through [`BuildError::kind`].

use thiserror::Error;

use crate::pipeline::StageId;

/// Errors that can end a build.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Invalid or contradictory build options. Raised before any stage runs.
    #[error("configuration: {0}")]
    Configuration(String),

    /// A loop-device slot could not be acquired or bound.
    #[error("resource acquisition: {0}")]
    ResourceAcquisition(String),

    /// A stage action failed.
    #[error("stage '{stage}' failed: {source:#}")]
    Stage {
        stage: StageId,
        #[source]
        source: anyhow::Error,
    },

    /// A converter precursor is missing or has an unusable size.
    #[error("format invariant: {0}")]
    FormatInvariant(String),
}

/// Coarse classification of a [`BuildError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ResourceAcquisition,
    StageExecution,
    FormatInvariant,
}

impl BuildError {
    pub fn config(msg: impl Into<String>) -> Self {
        BuildError::Configuration(msg.into())
    }

    /// Identifier of the failing stage, if the error came out of one.
    pub fn stage(&self) -> Option<StageId> {
        match self {
            BuildError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Kind of the underlying failure.
    ///
    /// Stage failures report the kind of their root cause when that cause is
    /// itself a typed `BuildError`, so a loop-slot timeout inside a disk stage
    /// reads as `ResourceAcquisition` rather than a generic stage failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Configuration(_) => ErrorKind::Configuration,
            BuildError::ResourceAcquisition(_) => ErrorKind::ResourceAcquisition,
            BuildError::FormatInvariant(_) => ErrorKind::FormatInvariant,
            BuildError::Stage { source, .. } => source
                .chain()
                .find_map(|cause| cause.downcast_ref::<BuildError>())
                .map(BuildError::kind)
                .unwrap_or(ErrorKind::StageExecution),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn stage_error_reports_root_kind() {
        let cause = Err::<(), _>(BuildError::ResourceAcquisition("no slot".into()))
            .context("binding raw disk")
            .unwrap_err();
        let err = BuildError::Stage {
            stage: StageId::GenRawDisk,
            source: cause,
        };
        assert_eq!(err.kind(), ErrorKind::ResourceAcquisition);
        assert_eq!(err.stage(), Some(StageId::GenRawDisk));
    }

    #[test]
    fn plain_stage_failure_is_stage_execution() {
        let err = BuildError::Stage {
            stage: StageId::ExtractSquashfs,
            source: anyhow::anyhow!("unsquashfs exited with status 1"),
        };
        assert_eq!(err.kind(), ErrorKind::StageExecution);
        let msg = err.to_string();
        assert!(msg.contains("extract-squashfs"));
        assert!(msg.contains("unsquashfs"));
    }

    #[test]
    fn configuration_has_no_stage() {
        let err = BuildError::config("no output format requested");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.stage().is_none());
    }
}
