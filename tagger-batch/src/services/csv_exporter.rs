//! CSV export
//!
//! Joins the reconciled result set back onto the accepted input rows and
//! writes one CSV row per record in input order: the source columns followed
//! by the classification columns. Output is a pure function of the run
//! folder's artifacts, so exporting twice produces identical bytes.

use super::artifacts::{load_manifest, load_records, load_results};
use super::checkpoint_store::CheckpointStore;
use crate::error::{PipelineError, PipelineResult};
use crate::layout::RunLayout;
use crate::models::{
    Checkpoint, ClassificationResult, ExportStats, InputRecord, Manifest, Outcome, Phase,
    PipelineStep,
};
use std::collections::HashMap;
use std::path::Path;

/// Columns appended after the source columns
pub const RESULT_COLUMNS: [&str; 7] = [
    "status",
    "subgenre",
    "secondary_subgenres",
    "energy",
    "accessibility",
    "reasoning",
    "reason",
];

const SECONDARY_SEPARATOR: &str = "; ";

/// Export the processed results of this run to `output_path`
pub fn export_run(
    layout: &RunLayout,
    output_path: &Path,
    store: &CheckpointStore,
    checkpoint: &mut Checkpoint,
) -> PipelineResult<ExportStats> {
    if checkpoint.phase < Phase::Processed {
        return Err(PipelineError::OutOfOrder {
            step: PipelineStep::Export,
            phase: checkpoint.phase,
        });
    }

    let manifest = load_manifest(layout)?;
    let records = load_records(layout)?;
    let results = load_results(layout)?;

    let stats = export(&results, &manifest, &records, output_path)?;

    checkpoint.export_stats = Some(stats.clone());
    checkpoint.advance_to(Phase::Exported);
    store.save(checkpoint)?;

    tracing::info!(
        output = %output_path.display(),
        total = stats.total,
        success = stats.success,
        error = stats.error,
        requires_review = stats.requires_review,
        invalid_input = stats.invalid_input,
        "Export complete"
    );

    Ok(stats)
}

/// Write the joined CSV and tally outcomes.
///
/// Fails with an export error unless results and records correspond one to
/// one; that mismatch means the run folder is inconsistent.
pub fn export(
    results: &[ClassificationResult],
    manifest: &Manifest,
    records: &[InputRecord],
    output_path: &Path,
) -> PipelineResult<ExportStats> {
    let ordered = join_results(results, records)?;

    let csv_err = |e: csv::Error| PipelineError::Export(format!("Cannot write CSV: {}", e));
    let mut writer = csv::Writer::from_writer(Vec::new());

    let header: Vec<&str> = manifest
        .columns
        .iter()
        .map(String::as_str)
        .chain(RESULT_COLUMNS)
        .collect();
    writer.write_record(&header).map_err(csv_err)?;

    for (record, result) in records.iter().zip(&ordered) {
        let mut row: Vec<String> = record.fields.clone();
        row.resize(manifest.columns.len(), String::new());
        row.extend(result_columns(&result.outcome));
        writer.write_record(&row).map_err(csv_err)?;
    }

    let buffer = writer
        .into_inner()
        .map_err(|e| PipelineError::Export(format!("Cannot write CSV: {}", e)))?;

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    tagger_common::fs::write_atomic(output_path, &buffer)?;

    let stats = ExportStats::tally(results, output_path.to_path_buf());
    debug_assert!(stats.is_partition());

    Ok(stats)
}

/// Results reordered to match `records`
fn join_results<'a>(
    results: &'a [ClassificationResult],
    records: &[InputRecord],
) -> PipelineResult<Vec<&'a ClassificationResult>> {
    let mut by_id: HashMap<&str, &ClassificationResult> = HashMap::with_capacity(results.len());
    for result in results {
        if by_id.insert(result.correlation_id.as_str(), result).is_some() {
            return Err(PipelineError::Export(format!(
                "Duplicate result for {}",
                result.correlation_id
            )));
        }
    }

    let ordered = records
        .iter()
        .map(|record| {
            by_id.remove(record.correlation_id.as_str()).ok_or_else(|| {
                PipelineError::Export(format!(
                    "No result for record {} (id {})",
                    record.correlation_id, record.id
                ))
            })
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    if !by_id.is_empty() {
        let mut unmatched: Vec<&str> = by_id.into_keys().collect();
        unmatched.sort_unstable();
        return Err(PipelineError::Export(format!(
            "Results without a matching record: {}",
            unmatched.join(", ")
        )));
    }

    Ok(ordered)
}

/// Values for [`RESULT_COLUMNS`]
fn result_columns(outcome: &Outcome) -> [String; 7] {
    let status = outcome.status().as_str().to_string();
    let reason = outcome.reason().unwrap_or_default().to_string();

    match outcome {
        Outcome::Success { classification } => [
            status,
            classification.subgenre.clone(),
            classification.secondary_subgenres.join(SECONDARY_SEPARATOR),
            classification.energy.label().to_string(),
            classification.accessibility.label().to_string(),
            classification.reasoning.clone(),
            reason,
        ],
        Outcome::RequiresHumanReview { fields, .. } => [
            status,
            fields.subgenre.clone().unwrap_or_default(),
            fields.secondary_subgenres.join(SECONDARY_SEPARATOR),
            fields.energy.clone().unwrap_or_default(),
            fields.accessibility.clone().unwrap_or_default(),
            fields.reasoning.clone().unwrap_or_default(),
            reason,
        ],
        Outcome::Error { .. } | Outcome::InvalidInput { .. } => [
            status,
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            reason,
        ],
    }
}
