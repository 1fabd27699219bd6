//! Pipeline orchestrator
//!
//! Owns one run folder (lock, checkpoint, artifacts) and sequences the
//! phases. Each step is independently invocable; [`Pipeline::run`] drives
//! every remaining step from the checkpoint's phase to export.
//!
//! # State Progression
//! INITIALIZED → PREPARED → SUBMITTED → JOB_COMPLETED → PROCESSED → EXPORTED
//!
//! Every phase transition is saved before the next step starts, so a failed
//! or interrupted run resumes at the step after the last saved phase.

use super::batch_client::BatchApi;
use super::checkpoint_store::{CheckpointStore, RunLock};
use super::input_preparer::{self, PrepareOutput};
use super::job_monitor::{self, MonitorReport};
use super::prompt::PromptBuilder;
use super::taxonomy::Taxonomy;
use super::{csv_exporter, job_submitter, result_processor};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::layout::RunLayout;
use crate::models::{Checkpoint, ClassificationResult, ExportStats, Phase, PipelineStep};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tagger_common::human_time::{format_duration, format_progress};
use thiserror::Error;

/// A run stopped by a fatal step error. The checkpoint is preserved.
#[derive(Debug, Error)]
#[error("Step '{step}' failed (run at phase '{phase}'): {error}")]
pub struct RunFailure {
    pub step: PipelineStep,
    /// Last saved phase
    pub phase: Phase,
    #[source]
    pub error: PipelineError,
}

impl RunFailure {
    /// Command that resumes the run after the cause is fixed
    pub fn resume_command(&self, run_dir: &Path) -> String {
        let step = match &self.error {
            // Replacing the failed job is an explicit operator decision
            PipelineError::JobFailed { .. } => "submit".to_string(),
            _ if self.step == PipelineStep::Prepare => "prepare <INPUT>".to_string(),
            _ => self.step.to_string(),
        };
        format!("tagger-batch --run-dir {} {}", run_dir.display(), step)
    }
}

/// Outcome of [`Pipeline::run`]
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_dir: PathBuf,
    /// Phase reached; below `Exported` only when a poll limit stopped the monitor
    pub phase: Phase,
    /// Wall time of each step run by this invocation
    pub timings: Vec<(PipelineStep, Duration)>,
    pub total: Duration,
    pub stats: Option<ExportStats>,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Exported
    }

    /// Human-readable report printed at the end of a run
    pub fn render(&self) -> String {
        let mut lines = Vec::new();

        for (step, elapsed) in &self.timings {
            lines.push(format!("  {:<8} {}", step.as_str(), format_duration(*elapsed)));
        }
        lines.push(format!("  {:<8} {}", "total", format_duration(self.total)));

        match (&self.stats, self.phase.next_step()) {
            (Some(stats), None) => lines.push(stats.display_string()),
            (_, Some(next)) => lines.push(format!(
                "Run paused at phase '{}'; continue with: tagger-batch --run-dir {} {}",
                self.phase,
                self.run_dir.display(),
                next
            )),
            (None, None) => {}
        }

        lines.join("\n")
    }
}

/// One batch run bound to its run folder.
///
/// Holds the run lock for its whole lifetime.
pub struct Pipeline {
    config: PipelineConfig,
    layout: RunLayout,
    store: CheckpointStore,
    checkpoint: Checkpoint,
    api: Option<Arc<dyn BatchApi>>,
    taxonomy: Taxonomy,
    prompt: PromptBuilder,
    // Dropped last: releases the run folder
    _lock: RunLock,
}

impl Pipeline {
    /// Lock the run folder and load (or create) its checkpoint.
    ///
    /// `api` may be `None` for steps that never reach the remote service.
    pub fn open(config: PipelineConfig, api: Option<Arc<dyn BatchApi>>) -> PipelineResult<Self> {
        let layout = RunLayout::new(config.run_dir.clone());
        std::fs::create_dir_all(layout.root())?;

        let lock = RunLock::acquire(layout.lock())?;
        let store = CheckpointStore::new(layout.checkpoint());
        let checkpoint = store.load_or_init()?;

        let taxonomy = Taxonomy::load(config.taxonomy_file.as_deref())?;
        let prompt = PromptBuilder::new(config.api.model.clone(), config.api.endpoint.clone(), &taxonomy);

        tracing::info!(
            run_dir = %layout.root().display(),
            run_id = %checkpoint.run_id,
            phase = %checkpoint.phase,
            "Opened run folder"
        );

        Ok(Self {
            config,
            layout,
            store,
            checkpoint,
            api,
            taxonomy,
            prompt,
            _lock: lock,
        })
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    fn api(&self) -> PipelineResult<Arc<dyn BatchApi>> {
        match &self.api {
            Some(api) => Ok(Arc::clone(api)),
            None => {
                self.config.require_api_key()?;
                Err(PipelineError::Common(tagger_common::Error::Config(
                    "No batch API client available".to_string(),
                )))
            }
        }
    }

    fn require_phase(&self, step: PipelineStep) -> PipelineResult<()> {
        if self.checkpoint.phase < step.requires() {
            return Err(PipelineError::OutOfOrder {
                step,
                phase: self.checkpoint.phase,
            });
        }
        Ok(())
    }

    pub fn prepare(&mut self, source: &Path) -> PipelineResult<PrepareOutput> {
        input_preparer::prepare(source, &self.layout, &self.prompt, &self.store, &mut self.checkpoint)
    }

    pub async fn submit(&mut self) -> PipelineResult<String> {
        let api = self.api()?;
        job_submitter::submit(
            api.as_ref(),
            &self.config.api,
            &self.layout.requests(),
            &self.store,
            &mut self.checkpoint,
        )
        .await
    }

    pub async fn monitor(&mut self) -> PipelineResult<MonitorReport> {
        let api = self.api()?;
        job_monitor::monitor(api.as_ref(), &self.config.monitor, &self.store, &mut self.checkpoint).await
    }

    pub async fn process(&mut self) -> PipelineResult<Vec<ClassificationResult>> {
        self.require_phase(PipelineStep::Process)?;
        let api = self.api()?;
        result_processor::process(
            api.as_ref(),
            &self.taxonomy,
            &self.layout,
            &self.store,
            &mut self.checkpoint,
        )
        .await
    }

    /// Export to `output`, or `classified.csv` in the run folder
    pub fn export(&mut self, output: Option<&Path>) -> PipelineResult<ExportStats> {
        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.layout.default_export());
        csv_exporter::export_run(&self.layout, &output, &self.store, &mut self.checkpoint)
    }

    /// Run every remaining step, starting after the checkpoint's phase.
    ///
    /// `source` is only read when the run has not been prepared yet.
    pub async fn run(
        &mut self,
        source: Option<&Path>,
        output: Option<&Path>,
    ) -> Result<RunSummary, RunFailure> {
        let started = Instant::now();
        let mut timings = Vec::new();

        if source.is_some() && self.checkpoint.phase > Phase::Initialized {
            tracing::info!(
                phase = %self.checkpoint.phase,
                "Run already prepared, resuming without re-reading input"
            );
        }

        while let Some(step) = self.checkpoint.phase.next_step() {
            let step_started = Instant::now();
            tracing::info!(step = %step, phase = %self.checkpoint.phase, "Starting step");

            let result = match step {
                PipelineStep::Prepare => match source {
                    Some(source) => self.prepare(source).map(|_| true),
                    None => Err(PipelineError::Input(
                        "Run is not prepared and no input dataset was given".to_string(),
                    )),
                },
                PipelineStep::Submit => self.submit().await.map(|_| true),
                PipelineStep::Monitor => self.monitor().await.map(|report| report.is_completed()),
                PipelineStep::Process => self.process().await.map(|_| true),
                PipelineStep::Export => self.export(output).map(|_| true),
            };

            let elapsed = step_started.elapsed();
            timings.push((step, elapsed));

            match result {
                Ok(true) => {
                    tracing::info!(step = %step, elapsed = %format_duration(elapsed), "Step complete");
                }
                Ok(false) => break,
                Err(error) => {
                    tracing::error!(
                        step = %step,
                        phase = %self.checkpoint.phase,
                        "Step failed: {}",
                        error
                    );
                    return Err(RunFailure {
                        step,
                        phase: self.checkpoint.phase,
                        error,
                    });
                }
            }
        }

        Ok(RunSummary {
            run_dir: self.layout.root().to_path_buf(),
            phase: self.checkpoint.phase,
            timings,
            total: started.elapsed(),
            stats: self.checkpoint.export_stats.clone(),
        })
    }

    pub fn status_report(&self) -> String {
        status_report(&self.layout, Some(&self.checkpoint))
    }
}

/// Checkpoint summary and next step.
///
/// Read-only: takes no lock and writes nothing.
pub fn status_report(layout: &RunLayout, checkpoint: Option<&Checkpoint>) -> String {
    let mut lines = vec![format!("Run folder:  {}", layout.root().display())];

    let Some(cp) = checkpoint else {
        lines.push("Phase:       (no checkpoint)".to_string());
        lines.push("Next step:   prepare <INPUT>".to_string());
        return lines.join("\n");
    };

    lines.push(format!("Run id:      {}", cp.run_id));
    lines.push(format!("Phase:       {}", cp.phase));
    lines.push(format!("Updated:     {} (revision {})", cp.updated_at.to_rfc3339(), cp.revision));

    if let Some(job_id) = &cp.job_id {
        let status = cp.job_status.as_ref().map(|s| s.to_string()).unwrap_or_default();
        lines.push(format!("Job:         {} ({})", job_id, status));
        lines.push(format!(
            "Requests:    {}, {} failed",
            format_progress(cp.request_counts.completed, cp.request_counts.total),
            cp.request_counts.failed
        ));
        lines.push(format!("Polls:       {}", cp.poll_count));
    }

    if let Some(stats) = &cp.export_stats {
        lines.push(format!("Export:      {}", stats.display_string()));
    }

    let next = match (cp.phase.next_step(), &cp.job_status) {
        (_, Some(status)) if status.is_failure() && cp.phase < Phase::JobCompleted => {
            "submit (previous job ended without output)".to_string()
        }
        (Some(PipelineStep::Prepare), _) => "prepare <INPUT>".to_string(),
        (Some(step), _) => step.to_string(),
        (None, _) => "none (run exported)".to_string(),
    };
    lines.push(format!("Next step:   {}", next));

    lines.join("\n")
}
