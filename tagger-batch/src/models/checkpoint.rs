//! Pipeline checkpoint
//!
//! The checkpoint is the only pipeline state that survives a process restart.
//! Every phase takes it by `&mut`, mutates it, and saves it through
//! [`CheckpointStore`](crate::services::checkpoint_store::CheckpointStore)
//! before the next phase starts.
//!
//! # Phase Progression
//! INITIALIZED → PREPARED → SUBMITTED → JOB_COMPLETED → PROCESSED → EXPORTED

use super::{BatchJob, ExportStats, JobStatus, RequestCounts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Current on-disk schema version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Last completed phase boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Run folder created, nothing done yet
    Initialized,
    /// Request file and manifest written
    Prepared,
    /// Remote job created
    Submitted,
    /// Remote job reached `completed`
    JobCompleted,
    /// Result set reconciled and persisted
    Processed,
    /// Output CSV written
    Exported,
}

impl Phase {
    /// Step that moves the run past this phase, `None` once exported
    pub fn next_step(self) -> Option<PipelineStep> {
        match self {
            Phase::Initialized => Some(PipelineStep::Prepare),
            Phase::Prepared => Some(PipelineStep::Submit),
            Phase::Submitted => Some(PipelineStep::Monitor),
            Phase::JobCompleted => Some(PipelineStep::Process),
            Phase::Processed => Some(PipelineStep::Export),
            Phase::Exported => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Initialized => "initialized",
            Phase::Prepared => "prepared",
            Phase::Submitted => "submitted",
            Phase::JobCompleted => "job_completed",
            Phase::Processed => "processed",
            Phase::Exported => "exported",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Independently invocable pipeline step (one CLI entry point each)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Prepare,
    Submit,
    Monitor,
    Process,
    Export,
}

impl PipelineStep {
    /// CLI subcommand name
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStep::Prepare => "prepare",
            PipelineStep::Submit => "submit",
            PipelineStep::Monitor => "monitor",
            PipelineStep::Process => "process",
            PipelineStep::Export => "export",
        }
    }

    /// Phase this step must find (at least) before it can run
    pub fn requires(self) -> Phase {
        match self {
            PipelineStep::Prepare => Phase::Initialized,
            PipelineStep::Submit => Phase::Prepared,
            PipelineStep::Monitor => Phase::Submitted,
            PipelineStep::Process => Phase::JobCompleted,
            PipelineStep::Export => Phase::Processed,
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of pipeline progress for one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Schema version
    pub version: u32,
    /// Incremented on every save
    pub revision: u64,
    pub run_id: Uuid,
    pub phase: Phase,

    pub job_id: Option<String>,
    pub job_status: Option<JobStatus>,
    #[serde(default)]
    pub request_counts: RequestCounts,

    /// Uploaded request file
    pub input_file_id: Option<String>,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub poll_count: u64,

    pub export_stats: Option<ExportStats>,
}

impl Checkpoint {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            version: CHECKPOINT_VERSION,
            revision: 0,
            run_id: Uuid::new_v4(),
            phase: Phase::Initialized,
            job_id: None,
            job_status: None,
            request_counts: RequestCounts::default(),
            input_file_id: None,
            output_file_id: None,
            error_file_id: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            last_polled_at: None,
            poll_count: 0,
            export_stats: None,
        }
    }

    /// Move to `phase`, logging the transition
    pub fn advance_to(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::info!(
                run_id = %self.run_id,
                from = %self.phase,
                to = %phase,
                "Checkpoint phase transition"
            );
        }
        self.phase = phase;
    }

    /// Job id that a new submission must not duplicate.
    ///
    /// Present while the job is non-terminal or completed; a job that
    /// failed, expired or was cancelled may be replaced.
    pub fn reusable_job_id(&self) -> Option<&str> {
        let job_id = self.job_id.as_deref()?;
        match &self.job_status {
            Some(status) if status.is_failure() => None,
            _ => Some(job_id),
        }
    }

    /// Forget everything about a previous submission (re-prepare)
    pub fn clear_job(&mut self) {
        self.job_id = None;
        self.job_status = None;
        self.request_counts = RequestCounts::default();
        self.input_file_id = None;
        self.output_file_id = None;
        self.error_file_id = None;
        self.submitted_at = None;
        self.last_polled_at = None;
        self.poll_count = 0;
        self.export_stats = None;
    }

    /// Record a freshly created remote job
    pub fn record_submission(&mut self, job: &BatchJob) {
        self.job_id = Some(job.id.clone());
        self.job_status = Some(job.status.clone());
        self.request_counts = job.request_counts;
        self.output_file_id = None;
        self.error_file_id = None;
        self.submitted_at = Some(Utc::now());
        self.last_polled_at = None;
        self.poll_count = 0;
        self.advance_to(Phase::Submitted);
    }

    /// Record one poll result.
    ///
    /// Returns `true` if the request counts moved backwards, which the
    /// remote contract forbids; the newer value is stored regardless.
    pub fn record_poll(&mut self, job: &BatchJob) -> bool {
        let regressed = job.request_counts.regressed_from(&self.request_counts);

        self.job_status = Some(job.status.clone());
        self.request_counts = job.request_counts;
        if job.output_file_id.is_some() {
            self.output_file_id = job.output_file_id.clone();
        }
        if job.error_file_id.is_some() {
            self.error_file_id = job.error_file_id.clone();
        }
        self.last_polled_at = Some(Utc::now());
        self.poll_count += 1;

        regressed
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(status: JobStatus, completed: u64) -> BatchJob {
        BatchJob {
            id: "batch_1".to_string(),
            status,
            input_file_id: "file-in".to_string(),
            output_file_id: None,
            error_file_id: None,
            request_counts: RequestCounts { total: 3, completed, failed: 0 },
        }
    }

    #[test]
    fn test_phase_order_and_next_step() {
        assert!(Phase::Initialized < Phase::Prepared);
        assert!(Phase::JobCompleted < Phase::Processed);
        assert_eq!(Phase::Initialized.next_step(), Some(PipelineStep::Prepare));
        assert_eq!(Phase::Submitted.next_step(), Some(PipelineStep::Monitor));
        assert_eq!(Phase::Exported.next_step(), None);

        let mut phase = Phase::Initialized;
        while let Some(step) = phase.next_step() {
            assert_eq!(step.requires(), phase);
            phase = match step {
                PipelineStep::Prepare => Phase::Prepared,
                PipelineStep::Submit => Phase::Submitted,
                PipelineStep::Monitor => Phase::JobCompleted,
                PipelineStep::Process => Phase::Processed,
                PipelineStep::Export => Phase::Exported,
            };
        }
        assert_eq!(phase, Phase::Exported);
    }

    #[test]
    fn test_reusable_job_id() {
        let mut checkpoint = Checkpoint::new();
        assert!(checkpoint.reusable_job_id().is_none());

        checkpoint.record_submission(&job(JobStatus::Validating, 0));
        assert_eq!(checkpoint.reusable_job_id(), Some("batch_1"));
        assert_eq!(checkpoint.phase, Phase::Submitted);

        checkpoint.job_status = Some(JobStatus::Completed);
        assert_eq!(checkpoint.reusable_job_id(), Some("batch_1"));

        checkpoint.job_status = Some(JobStatus::Expired);
        assert!(checkpoint.reusable_job_id().is_none());
    }

    #[test]
    fn test_record_poll_tracks_progress_and_regressions() {
        let mut checkpoint = Checkpoint::new();
        checkpoint.record_submission(&job(JobStatus::Validating, 0));

        assert!(!checkpoint.record_poll(&job(JobStatus::InProgress, 2)));
        assert_eq!(checkpoint.poll_count, 1);
        assert_eq!(checkpoint.request_counts.completed, 2);
        assert!(checkpoint.last_polled_at.is_some());

        assert!(checkpoint.record_poll(&job(JobStatus::InProgress, 1)));
        assert_eq!(checkpoint.request_counts.completed, 1);
        assert_eq!(checkpoint.poll_count, 2);
    }

    #[test]
    fn test_checkpoint_json_is_human_readable() {
        let mut checkpoint = Checkpoint::new();
        checkpoint.record_submission(&job(JobStatus::InProgress, 1));

        let json = serde_json::to_string_pretty(&checkpoint).unwrap();
        assert!(json.contains("\"phase\": \"submitted\""));
        assert!(json.contains("\"job_status\": \"in_progress\""));

        let restored: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, checkpoint);
    }
}
