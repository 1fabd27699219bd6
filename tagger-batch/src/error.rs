//! Error types for tagger-batch
//!
//! Phase-level errors only. Per-record anomalies found while processing
//! results are captured as classification outcomes instead.

use crate::models::{JobStatus, Phase, PipelineStep};
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad or empty input dataset (unrecoverable)
    #[error("Input error: {0}")]
    Input(String),

    /// Network or rate-limit failure; safe to retry the phase
    #[error("Transient error: {0}")]
    Transient(String),

    /// Remote service rejected the request batch (no retry)
    #[error("Submission error: {0}")]
    Submission(String),

    /// Polling gave up; the checkpoint remains valid for resume
    #[error("Monitor error: {0}")]
    Monitor(String),

    /// Remote job reached failed/expired/cancelled
    #[error("Batch job {job_id} ended in terminal state '{status}'")]
    JobFailed { job_id: String, status: JobStatus },

    /// Output artifact could not be fetched
    #[error("Processing error: {0}")]
    Processing(String),

    /// Result set and input records disagree (internal consistency bug)
    #[error("Export error (internal consistency): {0}")]
    Export(String),

    /// Checkpoint missing, corrupt, or from an unsupported version
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// A step was invoked before the phase it depends on completed
    #[error("Cannot run '{step}' while the run is at phase '{phase}'")]
    OutOfOrder { step: PipelineStep, phase: Phase },

    /// Another pipeline instance holds the run lock
    #[error("Run folder is locked by another pipeline instance (lock file: {}, holder: {holder})", .path.display())]
    Locked { path: PathBuf, holder: String },

    /// tagger-common error (I/O, JSON, configuration)
    #[error(transparent)]
    Common(#[from] tagger_common::Error),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Common(err.into())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Common(err.into())
    }
}

impl PipelineError {
    /// Whether re-running the same phase may succeed without operator action
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PipelineError::Transient(_) | PipelineError::Monitor(_) | PipelineError::Processing(_)
        )
    }
}

/// Result type for pipeline phases
pub type PipelineResult<T> = Result<T, PipelineError>;
