//! Run folder artifact I/O (JSON and JSONL files)

use crate::error::{PipelineError, PipelineResult};
use crate::layout::RunLayout;
use crate::models::{ClassificationResult, InputRecord, Manifest};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Serialize `items` one JSON document per line and write atomically
pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> PipelineResult<()> {
    let mut buffer = Vec::new();
    for item in items {
        serde_json::to_writer(&mut buffer, item)?;
        buffer.push(b'\n');
    }
    tagger_common::fs::write_atomic(path, &buffer)?;
    Ok(())
}

/// Read a JSONL file written by [`write_jsonl`]
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> PipelineResult<Vec<T>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                PipelineError::Checkpoint(format!(
                    "{} line {} is corrupt: {}",
                    path.display(),
                    index + 1,
                    e
                ))
            })
        })
        .collect()
}

pub fn save_manifest(layout: &RunLayout, manifest: &Manifest) -> PipelineResult<()> {
    let json = serde_json::to_vec_pretty(manifest)?;
    tagger_common::fs::write_atomic(&layout.manifest(), &json)?;
    Ok(())
}

pub fn load_manifest(layout: &RunLayout) -> PipelineResult<Manifest> {
    let path = layout.manifest();
    let content = std::fs::read_to_string(&path).map_err(|e| {
        PipelineError::Checkpoint(format!("Cannot read manifest {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| PipelineError::Checkpoint(format!("{} is corrupt: {}", path.display(), e)))
}

/// Accepted records in input order
pub fn load_records(layout: &RunLayout) -> PipelineResult<Vec<InputRecord>> {
    read_jsonl(&layout.records())
}

pub fn load_results(layout: &RunLayout) -> PipelineResult<Vec<ClassificationResult>> {
    read_jsonl(&layout.results())
}
