//! Job monitoring
//!
//! Polls the remote job until it reaches a terminal state, writing every
//! observation into the checkpoint so an interrupted monitor resumes against
//! the same job id.
//!
//! # State Machine
//! validating → in_progress → finalizing → completed
//!
//! `failed`, `expired` and `cancelled` end the run for operator attention.
//! `cancelling` and unknown statuses keep polling.

use super::batch_client::BatchApi;
use super::checkpoint_store::CheckpointStore;
use crate::config::MonitorSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{BatchJob, Checkpoint, JobStatus, Phase, PipelineStep, RequestCounts};
use std::time::Duration;
use tagger_common::human_time::format_progress;

/// Outcome of one monitor invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub job_id: String,
    /// `Completed`, or the last non-terminal status when the poll limit hit
    pub status: JobStatus,
    pub request_counts: RequestCounts,
    /// Polls made by this invocation
    pub polls: u32,
}

impl MonitorReport {
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Poll the checkpoint's job until it is terminal (or the poll limit hits)
pub async fn monitor(
    api: &dyn BatchApi,
    settings: &MonitorSettings,
    store: &CheckpointStore,
    checkpoint: &mut Checkpoint,
) -> PipelineResult<MonitorReport> {
    let job_id = match (&checkpoint.job_id, checkpoint.phase >= Phase::Submitted) {
        (Some(job_id), true) => job_id.clone(),
        _ => {
            return Err(PipelineError::OutOfOrder {
                step: PipelineStep::Monitor,
                phase: checkpoint.phase,
            })
        }
    };

    if checkpoint.phase >= Phase::JobCompleted
        && checkpoint.job_status == Some(JobStatus::Completed)
    {
        tracing::info!(job_id = %job_id, "Batch job already completed");
        return Ok(MonitorReport {
            job_id,
            status: JobStatus::Completed,
            request_counts: checkpoint.request_counts,
            polls: 0,
        });
    }

    tracing::info!(
        job_id = %job_id,
        previous_polls = checkpoint.poll_count,
        interval_secs = settings.poll_interval.as_secs(),
        "Monitoring batch job"
    );

    let mut polls = 0u32;
    loop {
        let job = fetch_with_backoff(api, &job_id, settings).await?;
        polls += 1;

        if checkpoint.record_poll(&job) {
            tracing::warn!(
                job_id = %job_id,
                total = job.request_counts.total,
                completed = job.request_counts.completed,
                failed = job.request_counts.failed,
                "Request counts moved backwards"
            );
        }

        let counts = job.request_counts;
        match &job.status {
            JobStatus::Completed => {
                checkpoint.advance_to(Phase::JobCompleted);
                store.save(checkpoint)?;
                tracing::info!(
                    job_id = %job_id,
                    completed = counts.completed,
                    failed = counts.failed,
                    total = counts.total,
                    "Batch job completed"
                );
                return Ok(MonitorReport {
                    job_id,
                    status: JobStatus::Completed,
                    request_counts: counts,
                    polls,
                });
            }
            status if status.is_failure() => {
                store.save(checkpoint)?;
                tracing::error!(
                    job_id = %job_id,
                    status = %status,
                    "Batch job ended without output; operator action required"
                );
                return Err(PipelineError::JobFailed {
                    job_id,
                    status: status.clone(),
                });
            }
            JobStatus::Unknown(raw) => {
                store.save(checkpoint)?;
                tracing::warn!(job_id = %job_id, status = %raw, "Unexpected job status, continuing to poll");
            }
            status => {
                store.save(checkpoint)?;
                tracing::info!(
                    job_id = %job_id,
                    status = %status,
                    progress = %format_progress(counts.completed, counts.total),
                    failed = counts.failed,
                    "Batch job progress"
                );
            }
        }

        if settings.max_polls.is_some_and(|limit| polls >= limit) {
            tracing::info!(
                job_id = %job_id,
                polls,
                "Poll limit reached; re-run monitor to continue"
            );
            return Ok(MonitorReport {
                job_id,
                status: job.status,
                request_counts: counts,
                polls,
            });
        }

        tokio::time::sleep(settings.poll_interval).await;
    }
}

/// Fetch job status, retrying transient failures with capped exponential backoff.
///
/// **Algorithm:**
/// 1. Attempt the fetch
/// 2. On success, return the job
/// 3. On a transient failure with retries left: log WARN, back off, retry
/// 4. On a non-transient failure or exhausted retries: `MonitorError`
///
/// **Backoff Strategy:** starts at `backoff_initial`, doubles per attempt,
/// capped at `backoff_max`.
async fn fetch_with_backoff(
    api: &dyn BatchApi,
    job_id: &str,
    settings: &MonitorSettings,
) -> PipelineResult<BatchJob> {
    let mut attempt = 0u32;
    let mut backoff = settings.backoff_initial;

    loop {
        attempt += 1;

        match api.retrieve_batch(job_id).await {
            Ok(job) => {
                if attempt > 1 {
                    tracing::info!(job_id, attempt, "Job status fetched after retry");
                }
                return Ok(job);
            }
            Err(err) if !err.is_transient() => {
                tracing::error!(job_id, attempt, "Job status fetch failed: {}", err);
                return Err(PipelineError::Monitor(format!(
                    "Cannot fetch status of job {}: {}",
                    job_id, err
                )));
            }
            Err(err) => {
                if attempt > settings.max_retries {
                    tracing::error!(
                        job_id,
                        attempt,
                        max_retries = settings.max_retries,
                        "Job status fetch failed: retry budget exhausted"
                    );
                    return Err(PipelineError::Monitor(format!(
                        "Job {} status unavailable after {} attempts: {}",
                        job_id, attempt, err
                    )));
                }

                let delay = backoff.min(settings.backoff_max);
                tracing::warn!(
                    job_id,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "Transient error fetching job status, will retry after backoff: {}",
                    err
                );

                tokio::time::sleep(delay).await;
                backoff = next_backoff(backoff, settings.backoff_max);
            }
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}
