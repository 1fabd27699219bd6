//! Job submission
//!
//! Uploads the request file and creates the remote batch job, at most once
//! per live job: a checkpoint holding a non-terminal (or completed) job id
//! short-circuits submission and returns that id.

use super::batch_client::{ApiClientError, BatchApi};
use super::checkpoint_store::CheckpointStore;
use crate::config::ApiSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Checkpoint, Phase, PipelineStep};
use std::path::Path;

/// Map a client error onto the submission error taxonomy
fn submission_error(action: &str, err: ApiClientError) -> PipelineError {
    if err.is_transient() {
        PipelineError::Transient(format!("{} failed: {}", action, err))
    } else {
        PipelineError::Submission(format!("{} failed: {}", action, err))
    }
}

/// Submit the prepared request file, returning the remote job id
pub async fn submit(
    api: &dyn BatchApi,
    settings: &ApiSettings,
    request_file: &Path,
    store: &CheckpointStore,
    checkpoint: &mut Checkpoint,
) -> PipelineResult<String> {
    if checkpoint.phase < Phase::Prepared {
        return Err(PipelineError::OutOfOrder {
            step: PipelineStep::Submit,
            phase: checkpoint.phase,
        });
    }

    if let Some(job_id) = checkpoint.reusable_job_id() {
        tracing::info!(
            job_id,
            status = %checkpoint.job_status.as_ref().map(|s| s.to_string()).unwrap_or_default(),
            "Batch job already submitted, skipping submission"
        );
        return Ok(job_id.to_string());
    }

    if let (Some(old_id), Some(status)) = (&checkpoint.job_id, &checkpoint.job_status) {
        tracing::warn!(
            old_job_id = %old_id,
            status = %status,
            "Previous batch job ended without output, submitting a replacement"
        );
    }

    let input_file_id = match checkpoint.input_file_id.clone() {
        Some(file_id) => {
            tracing::info!(file_id = %file_id, "Reusing previously uploaded request file");
            file_id
        }
        None => {
            let contents = std::fs::read(request_file)?;
            if contents.is_empty() {
                return Err(PipelineError::Submission(format!(
                    "Request file {} is empty",
                    request_file.display()
                )));
            }

            let file_name = request_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "requests.jsonl".to_string());

            let file_id = api
                .upload_batch_file(&file_name, contents)
                .await
                .map_err(|e| submission_error("Upload", e))?;

            checkpoint.input_file_id = Some(file_id.clone());
            store.save(checkpoint)?;
            file_id
        }
    };

    let job = api
        .create_batch(&input_file_id, &settings.endpoint, &settings.completion_window)
        .await
        .map_err(|e| submission_error("Batch creation", e))?;

    if job.status.is_failure() {
        tracing::warn!(job_id = %job.id, status = %job.status, "Batch job failed immediately");
    }

    checkpoint.record_submission(&job);
    store.save(checkpoint)?;

    tracing::info!(
        job_id = %job.id,
        status = %job.status,
        input_file_id = %input_file_id,
        "Batch job submitted"
    );

    Ok(job.id)
}
