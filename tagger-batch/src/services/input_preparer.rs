//! Input preparation
//!
//! Reads the source CSV, rejects rows failing validation (to `rejected.csv`),
//! assigns correlation ids and writes one classification request per
//! accepted row.
//!
//! # Outputs (run folder)
//! - `requests.jsonl` - batch request file
//! - `records.jsonl` - accepted records, input order
//! - `rejected.csv` - `row,id,reason`
//! - `manifest.json` - accepted/rejected counts and source columns

use super::artifacts::{save_manifest, write_jsonl};
use super::checkpoint_store::CheckpointStore;
use super::prompt::PromptBuilder;
use crate::error::{PipelineError, PipelineResult};
use crate::layout::RunLayout;
use crate::models::{Checkpoint, InputRecord, Manifest, Phase};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub(crate) const ID_ALIASES: &[&str] = &["id", "track_id", "song_id"];

/// Result of the prepare phase
#[derive(Debug, Clone)]
pub struct PrepareOutput {
    pub request_file: PathBuf,
    pub manifest: Manifest,
}

/// Row excluded from the batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    /// Zero-based data row
    pub row: usize,
    pub id: String,
    pub reason: String,
}

/// Accepted and rejected rows of one source dataset
#[derive(Debug, Clone)]
pub struct ValidatedDataset {
    pub columns: Vec<String>,
    pub records: Vec<InputRecord>,
    pub rejected: Vec<RejectedRow>,
}

/// Positions of the required columns in the header
#[derive(Debug, Clone, Copy)]
struct RequiredColumns {
    id: usize,
    title: usize,
    artist: usize,
}

impl RequiredColumns {
    fn locate(headers: &[String]) -> PipelineResult<Self> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.contains(&h.trim().to_lowercase().as_str()))
        };

        let missing: Vec<&str> = [
            ("id", find(ID_ALIASES)),
            ("title", find(&["title"])),
            ("artist", find(&["artist"])),
        ]
        .iter()
        .filter(|(_, pos)| pos.is_none())
        .map(|(name, _)| *name)
        .collect();

        if !missing.is_empty() {
            return Err(PipelineError::Input(format!(
                "Input dataset is missing required column(s): {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            id: find(ID_ALIASES).unwrap_or_default(),
            title: find(&["title"]).unwrap_or_default(),
            artist: find(&["artist"]).unwrap_or_default(),
        })
    }
}

/// Read and validate a CSV dataset without writing anything
pub fn validate_dataset<R: std::io::Read>(reader: R) -> PipelineResult<ValidatedDataset> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let columns: Vec<String> = csv_reader
        .headers()
        .map_err(|e| PipelineError::Input(format!("Cannot read CSV header: {}", e)))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    let required = RequiredColumns::locate(&columns)?;

    let mut records = Vec::new();
    let mut rejected = Vec::new();
    let mut seen_ids = HashSet::new();

    for (row, result) in csv_reader.records().enumerate() {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                rejected.push(RejectedRow {
                    row,
                    id: String::new(),
                    reason: format!("malformed row: {}", e),
                });
                continue;
            }
        };

        let field = |index: usize| raw.get(index).unwrap_or("").trim().to_string();
        let id = field(required.id);

        let reason = if raw.len() > columns.len() {
            Some(format!(
                "expected {} fields, found {}",
                columns.len(),
                raw.len()
            ))
        } else if id.is_empty() {
            Some("missing required field: id".to_string())
        } else if field(required.title).is_empty() {
            Some("missing required field: title".to_string())
        } else if field(required.artist).is_empty() {
            Some("missing required field: artist".to_string())
        } else if !seen_ids.insert(id.clone()) {
            Some(format!("duplicate id: {}", id))
        } else {
            None
        };

        if let Some(reason) = reason {
            tracing::warn!(row, id = %id, reason = %reason, "Rejected input row");
            rejected.push(RejectedRow { row, id, reason });
            continue;
        }

        let mut fields: Vec<String> = raw.iter().map(str::to_string).collect();
        fields.resize(columns.len(), String::new());

        records.push(InputRecord {
            row,
            correlation_id: InputRecord::correlation_id_for_row(row),
            title: field(required.title),
            artist: field(required.artist),
            id,
            fields,
        });
    }

    Ok(ValidatedDataset {
        columns,
        records,
        rejected,
    })
}

/// Prepare the batch request file for `source`.
///
/// Refused while a live or completed remote job exists for this run:
/// re-preparing would orphan it. Use a fresh run folder instead. After a
/// failed/expired/cancelled job the input may be prepared again.
pub fn prepare(
    source: &Path,
    layout: &RunLayout,
    prompt: &PromptBuilder,
    store: &CheckpointStore,
    checkpoint: &mut Checkpoint,
) -> PipelineResult<PrepareOutput> {
    if let Some(job_id) = checkpoint.reusable_job_id() {
        return Err(PipelineError::Input(format!(
            "Run {} already submitted job {}; use a fresh run folder to prepare new input",
            checkpoint.run_id, job_id
        )));
    }

    tracing::info!(source = %source.display(), "Preparing batch input");

    let file = std::fs::File::open(source).map_err(|e| {
        PipelineError::Input(format!("Cannot open input dataset {}: {}", source.display(), e))
    })?;
    let dataset = validate_dataset(std::io::BufReader::new(file))?;

    if dataset.records.is_empty() {
        return Err(PipelineError::Input(format!(
            "No valid records in {} ({} rejected)",
            source.display(),
            dataset.rejected.len()
        )));
    }

    let requests: Vec<_> = dataset
        .records
        .iter()
        .map(|record| prompt.request_for(record, &dataset.columns))
        .collect();

    write_jsonl(&layout.requests(), &requests)?;
    write_jsonl(&layout.records(), &dataset.records)?;
    write_rejected(&layout.rejected(), &dataset.rejected)?;

    let manifest = Manifest {
        source: source.to_path_buf(),
        columns: dataset.columns,
        total_accepted: dataset.records.len(),
        total_rejected: dataset.rejected.len(),
        created_at: Utc::now(),
    };
    save_manifest(layout, &manifest)?;

    checkpoint.clear_job();
    checkpoint.advance_to(Phase::Prepared);
    store.save(checkpoint)?;

    tracing::info!(
        accepted = manifest.total_accepted,
        rejected = manifest.total_rejected,
        request_file = %layout.requests().display(),
        "Batch input prepared"
    );

    Ok(PrepareOutput {
        request_file: layout.requests(),
        manifest,
    })
}

fn write_rejected(path: &Path, rejected: &[RejectedRow]) -> PipelineResult<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let csv_err = |e: csv::Error| PipelineError::Input(format!("Cannot write rejected rows: {}", e));

    writer.write_record(["row", "id", "reason"]).map_err(csv_err)?;
    for row in rejected {
        writer
            .write_record([row.row.to_string().as_str(), row.id.as_str(), row.reason.as_str()])
            .map_err(csv_err)?;
    }

    let buffer = writer
        .into_inner()
        .map_err(|e| PipelineError::Input(format!("Cannot write rejected rows: {}", e)))?;
    tagger_common::fs::write_atomic(path, &buffer)?;
    Ok(())
}
