//! Result processing
//!
//! Downloads the completed job's output (and error) artifacts, correlates
//! every line to its request by `custom_id`, and classifies it:
//!
//! | Line                                            | Outcome                 |
//! |-------------------------------------------------|-------------------------|
//! | 2xx, content valid in every domain              | SUCCESS                 |
//! | 2xx, JSON content failing a field/domain check  | REQUIRES_HUMAN_REVIEW   |
//! | 4xx (not 408/429), invalid-request error codes  | INVALID_INPUT           |
//! | unparseable line/content, 5xx/408/429, errors   | ERROR                   |
//!
//! Records never mentioned by either artifact become ERROR "missing result".
//! Bad lines never fail the phase; only an unfetchable artifact does.

use super::artifacts::{load_manifest, load_records, write_jsonl};
use super::batch_client::BatchApi;
use super::checkpoint_store::CheckpointStore;
use super::prompt::response_content;
use super::taxonomy::Taxonomy;
use crate::error::{PipelineError, PipelineResult};
use crate::layout::RunLayout;
use crate::models::{
    Accessibility, Checkpoint, Classification, ClassificationFields, ClassificationResult, Energy,
    InputRecord, JobStatus, Outcome, Phase,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Secondary subgenres allowed per song
const MAX_SECONDARY_SUBGENRES: usize = 2;

/// Remote error codes meaning the request itself was rejected
const INVALID_REQUEST_CODES: &[&str] = &[
    "invalid_request",
    "invalid_request_error",
    "invalid_value",
    "invalid_argument",
    "invalid_prompt",
];

#[derive(Debug, Deserialize)]
struct OutputLine {
    #[serde(default)]
    response: Option<LineResponse>,
    #[serde(default)]
    error: Option<LineError>,
}

#[derive(Debug, Deserialize)]
struct LineResponse {
    status_code: u16,
    #[serde(default)]
    body: Value,
}

#[derive(Debug, Deserialize)]
struct LineError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl LineError {
    fn describe(&self) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (Some(code), None) => code.clone(),
            (None, Some(message)) => message.clone(),
            (None, None) => "unspecified error".to_string(),
        }
    }

    fn is_invalid_request(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| INVALID_REQUEST_CODES.contains(&code))
    }
}

/// Reconciled result set plus line-level diagnostics
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// One result per record, input order
    pub results: Vec<ClassificationResult>,
    /// Records the artifacts never mentioned
    pub missing: usize,
    /// Lines with no usable or known `custom_id`
    pub orphan_lines: usize,
    /// Extra lines for an already-seen `custom_id`
    pub duplicate_lines: usize,
}

/// Download, reconcile and persist the results of the completed job
pub async fn process(
    api: &dyn BatchApi,
    taxonomy: &Taxonomy,
    layout: &RunLayout,
    store: &CheckpointStore,
    checkpoint: &mut Checkpoint,
) -> PipelineResult<Vec<ClassificationResult>> {
    let job_id = checkpoint
        .job_id
        .clone()
        .ok_or_else(|| PipelineError::Processing("No batch job recorded in checkpoint".to_string()))?;

    if checkpoint.job_status != Some(JobStatus::Completed) {
        return Err(PipelineError::Processing(format!(
            "Job {} is not completed (status: {})",
            job_id,
            checkpoint
                .job_status
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )));
    }

    if checkpoint.output_file_id.is_none() && checkpoint.error_file_id.is_none() {
        return Err(PipelineError::Processing(format!(
            "Job {} completed without output or error artifact",
            job_id
        )));
    }

    let output = fetch_artifact(api, checkpoint.output_file_id.as_deref(), &layout.output()).await?;
    let errors = fetch_artifact(api, checkpoint.error_file_id.as_deref(), &layout.errors()).await?;

    let records = load_records(layout)?;
    let manifest = load_manifest(layout)?;
    if records.len() != manifest.total_accepted {
        return Err(PipelineError::Checkpoint(format!(
            "{} holds {} records but the manifest lists {} accepted",
            layout.records().display(),
            records.len(),
            manifest.total_accepted
        )));
    }

    let reconciliation = reconcile(&records, [output.as_str(), errors.as_str()], taxonomy);

    if reconciliation.orphan_lines > 0 || reconciliation.duplicate_lines > 0 {
        tracing::warn!(
            job_id = %job_id,
            orphan_lines = reconciliation.orphan_lines,
            duplicate_lines = reconciliation.duplicate_lines,
            "Ignored output lines that could not be correlated"
        );
    }

    write_jsonl(&layout.results(), &reconciliation.results)?;
    checkpoint.advance_to(Phase::Processed);
    store.save(checkpoint)?;

    tracing::info!(
        job_id = %job_id,
        results = reconciliation.results.len(),
        missing = reconciliation.missing,
        "Results processed"
    );

    Ok(reconciliation.results)
}

/// Download one artifact and keep a copy in the run folder.
///
/// An absent file id yields empty content.
async fn fetch_artifact(
    api: &dyn BatchApi,
    file_id: Option<&str>,
    copy_path: &std::path::Path,
) -> PipelineResult<String> {
    let Some(file_id) = file_id else {
        return Ok(String::new());
    };

    let bytes = api.download_file(file_id).await.map_err(|e| {
        PipelineError::Processing(format!("Cannot download artifact {}: {}", file_id, e))
    })?;
    tagger_common::fs::write_atomic(copy_path, &bytes)?;

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Correlate artifact lines to records and classify each.
///
/// Earlier artifacts win when a `custom_id` appears more than once.
pub fn reconcile<'a>(
    records: &[InputRecord],
    artifacts: impl IntoIterator<Item = &'a str>,
    taxonomy: &Taxonomy,
) -> Reconciliation {
    let known: HashMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.correlation_id.as_str(), i))
        .collect();

    let mut outcomes: Vec<Option<Outcome>> = vec![None; records.len()];
    let mut orphan_lines = 0;
    let mut duplicate_lines = 0;

    for line in artifacts.into_iter().flat_map(|artifact| artifact.lines()) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((custom_id, outcome)) = parse_line(line, taxonomy) else {
            orphan_lines += 1;
            tracing::warn!(line = %truncate(line, 200), "Output line has no usable custom_id");
            continue;
        };

        let Some(&index) = known.get(custom_id.as_str()) else {
            orphan_lines += 1;
            tracing::warn!(custom_id = %custom_id, "Output line for unknown custom_id");
            continue;
        };

        if outcomes[index].is_some() {
            duplicate_lines += 1;
            tracing::warn!(custom_id = %custom_id, "Duplicate output line, keeping the first");
            continue;
        }
        outcomes[index] = Some(outcome);
    }

    let mut missing = 0;
    let results = records
        .iter()
        .zip(outcomes)
        .map(|(record, outcome)| match outcome {
            Some(outcome) => ClassificationResult::new(record.correlation_id.clone(), outcome),
            None => {
                missing += 1;
                tracing::debug!(correlation_id = %record.correlation_id, id = %record.id, "Missing result");
                ClassificationResult::missing(record.correlation_id.clone())
            }
        })
        .collect();

    Reconciliation {
        results,
        missing,
        orphan_lines,
        duplicate_lines,
    }
}

/// Parse one artifact line into its `custom_id` and outcome.
///
/// `None` when the line is not JSON or carries no `custom_id`.
fn parse_line(line: &str, taxonomy: &Taxonomy) -> Option<(String, Outcome)> {
    let value: Value = serde_json::from_str(line).ok()?;
    let custom_id = value.get("custom_id")?.as_str()?.to_string();

    let outcome = match serde_json::from_value::<OutputLine>(value) {
        Ok(parsed) => classify_line(parsed, taxonomy),
        Err(e) => Outcome::error(format!("unparseable result line: {}", e)),
    };

    Some((custom_id, outcome))
}

fn classify_line(line: OutputLine, taxonomy: &Taxonomy) -> Outcome {
    if let Some(error) = line.error {
        return if error.is_invalid_request() {
            Outcome::invalid_input(error.describe())
        } else {
            Outcome::error(format!("remote execution error: {}", error.describe()))
        };
    }

    let Some(response) = line.response else {
        return Outcome::error("result line has neither response nor error");
    };

    match response.status_code {
        200..=299 => classify_body(&response.body, taxonomy),
        // Auth, permission, timeout and rate-limit failures say nothing about the request
        401 | 403 | 408 | 429 => Outcome::error(format!(
            "remote execution error (HTTP {}): {}",
            response.status_code,
            body_error_message(&response.body)
        )),
        400..=499 => Outcome::invalid_input(format!(
            "request rejected (HTTP {}): {}",
            response.status_code,
            body_error_message(&response.body)
        )),
        status => Outcome::error(format!(
            "remote execution error (HTTP {}): {}",
            status,
            body_error_message(&response.body)
        )),
    }
}

fn body_error_message(body: &Value) -> String {
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("no error message")
        .to_string()
}

fn classify_body(body: &Value, taxonomy: &Taxonomy) -> Outcome {
    let Some(content) = response_content(body) else {
        return Outcome::error("response has no message content");
    };

    match serde_json::from_str::<Value>(strip_code_fence(content)) {
        Ok(Value::Object(object)) => classify_content(&object, taxonomy),
        Ok(_) => Outcome::RequiresHumanReview {
            fields: ClassificationFields::default(),
            reason: "classification content is not a JSON object".to_string(),
        },
        Err(e) => Outcome::error(format!("unparseable classification content: {}", e)),
    }
}

/// Models sometimes wrap JSON in a markdown code fence
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn string_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Validate a well-formed classification object
fn classify_content(object: &Map<String, Value>, taxonomy: &Taxonomy) -> Outcome {
    let mut problems = Vec::new();

    let secondary_value = object
        .get("secondary_subgenres")
        .or_else(|| object.get("secondary"));
    let secondary_subgenres: Vec<String> = match secondary_value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item.as_str() {
                Some(s) => Some(s.trim().to_string()),
                None => {
                    problems.push("secondary subgenre is not a string".to_string());
                    None
                }
            })
            .collect(),
        Some(Value::String(single)) => vec![single.trim().to_string()],
        Some(_) => {
            problems.push("secondary_subgenres is not a list".to_string());
            Vec::new()
        }
    };

    let fields = ClassificationFields {
        subgenre: string_field(object, &["subgenre", "primary_subgenre"]),
        secondary_subgenres,
        energy: string_field(object, &["energy"]),
        accessibility: string_field(object, &["accessibility"]),
        reasoning: string_field(object, &["reasoning"]),
    };
    let reason = string_field(object, &["reason"]);

    match string_field(object, &["status"]).map(|s| s.to_uppercase()).as_deref() {
        Some("INVALID_INPUT") => {
            return Outcome::invalid_input(
                reason.unwrap_or_else(|| "model reported invalid input".to_string()),
            )
        }
        Some("ERROR") => {
            return Outcome::error(reason.unwrap_or_else(|| "model reported an error".to_string()))
        }
        Some("REQUIRES_HUMAN_REVIEW") => {
            return Outcome::RequiresHumanReview {
                fields,
                reason: reason.unwrap_or_else(|| "model requested human review".to_string()),
            }
        }
        _ => {}
    }

    let subgenre = match fields.subgenre.as_deref() {
        None => {
            problems.push("missing subgenre".to_string());
            None
        }
        Some(name) => match taxonomy.canonical(name) {
            Some(canonical) => Some(canonical.to_string()),
            None => {
                problems.push(format!("unknown subgenre '{}'", name));
                None
            }
        },
    };

    if fields.secondary_subgenres.len() > MAX_SECONDARY_SUBGENRES {
        problems.push(format!(
            "{} secondary subgenres (max {})",
            fields.secondary_subgenres.len(),
            MAX_SECONDARY_SUBGENRES
        ));
    }

    let mut secondary = Vec::new();
    for name in &fields.secondary_subgenres {
        match taxonomy.canonical(name) {
            None => problems.push(format!("unknown secondary subgenre '{}'", name)),
            Some(canonical) if subgenre.as_deref() == Some(canonical) => {
                problems.push(format!("secondary subgenre '{}' repeats the primary", canonical))
            }
            Some(canonical) if secondary.iter().any(|s: &String| s == canonical) => {
                problems.push(format!("secondary subgenre '{}' listed twice", canonical))
            }
            Some(canonical) => secondary.push(canonical.to_string()),
        }
    }

    let energy = match fields.energy.as_deref() {
        None => {
            problems.push("missing energy".to_string());
            None
        }
        Some(value) => Energy::parse(value).or_else(|| {
            problems.push(format!("invalid energy '{}'", value));
            None
        }),
    };

    let accessibility = match fields.accessibility.as_deref() {
        None => {
            problems.push("missing accessibility".to_string());
            None
        }
        Some(value) => Accessibility::parse(value).or_else(|| {
            problems.push(format!("invalid accessibility '{}'", value));
            None
        }),
    };

    match (subgenre, energy, accessibility) {
        (Some(subgenre), Some(energy), Some(accessibility)) if problems.is_empty() => {
            Outcome::Success {
                classification: Classification {
                    subgenre,
                    secondary_subgenres: secondary,
                    energy,
                    accessibility,
                    reasoning: fields.reasoning.unwrap_or_default(),
                },
            }
        }
        _ => Outcome::RequiresHumanReview {
            fields,
            reason: problems.join("; "),
        },
    }
}

fn truncate(line: &str, max: usize) -> &str {
    match line.char_indices().nth(max) {
        Some((index, _)) => &line[..index],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutcomeStatus;
    use serde_json::json;

    fn record(row: usize, id: &str) -> InputRecord {
        InputRecord {
            row,
            correlation_id: InputRecord::correlation_id_for_row(row),
            id: id.to_string(),
            title: format!("Song {}", id),
            artist: "Artist".to_string(),
            fields: vec![id.to_string(), format!("Song {}", id), "Artist".to_string()],
        }
    }

    fn success_line(custom_id: &str, content: Value) -> String {
        json!({
            "id": "resp",
            "custom_id": custom_id,
            "response": {
                "status_code": 200,
                "body": {"choices": [{"message": {"role": "assistant", "content": content.to_string()}}]}
            },
            "error": null
        })
        .to_string()
    }

    fn valid_content() -> Value {
        json!({
            "subgenre": "indie pop",
            "secondary_subgenres": ["2010s Indie Pop"],
            "energy": "High",
            "accessibility": "Commercial",
            "reasoning": "Upbeat indie pop."
        })
    }

    fn classify(line: &str) -> Outcome {
        parse_line(line, &Taxonomy::builtin()).unwrap().1
    }

    #[test]
    fn test_valid_content_is_success_with_canonical_names() {
        match classify(&success_line("row-000000", valid_content())) {
            Outcome::Success { classification } => {
                assert_eq!(classification.subgenre, "Indie Pop");
                assert_eq!(classification.secondary_subgenres, ["2010s Indie Pop"]);
                assert_eq!(classification.energy, Energy::High);
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_subgenre_requires_review() {
        let mut content = valid_content();
        content["subgenre"] = json!("Space Polka");

        match classify(&success_line("row-000000", content)) {
            Outcome::RequiresHumanReview { fields, reason } => {
                assert_eq!(fields.subgenre.as_deref(), Some("Space Polka"));
                assert!(reason.contains("unknown subgenre 'Space Polka'"));
            }
            other => panic!("expected review, got {:?}", other),
        }
    }

    #[test]
    fn test_domain_violations_are_all_reported() {
        let content = json!({
            "subgenre": "Indie Pop",
            "secondary_subgenres": ["Indie Pop", "Soft Rock", "Soft Rock"],
            "energy": "Extreme",
        });

        let outcome = classify(&success_line("row-000000", content));
        let reason = outcome.reason().unwrap();
        assert_eq!(outcome.status(), OutcomeStatus::RequiresHumanReview);
        assert!(reason.contains("3 secondary subgenres"));
        assert!(reason.contains("repeats the primary"));
        assert!(reason.contains("listed twice"));
        assert!(reason.contains("invalid energy 'Extreme'"));
        assert!(reason.contains("missing accessibility"));
    }

    #[test]
    fn test_model_reported_statuses() {
        let invalid = json!({"status": "INVALID_INPUT", "reason": "not a real song"});
        assert_eq!(
            classify(&success_line("row-000000", invalid)),
            Outcome::invalid_input("not a real song")
        );

        let mut review = valid_content();
        review["status"] = json!("requires_human_review");
        assert_eq!(
            classify(&success_line("row-000000", review)).status(),
            OutcomeStatus::RequiresHumanReview
        );
    }

    #[test]
    fn test_unparseable_content_is_error() {
        let line = json!({
            "custom_id": "row-000000",
            "response": {"status_code": 200, "body": {"choices": [{"message": {"content": "Indie Pop, probably"}}]}}
        })
        .to_string();

        let outcome = classify(&line);
        assert_eq!(outcome.status(), OutcomeStatus::Error);
        assert!(outcome.reason().unwrap().starts_with("unparseable classification content"));
    }

    #[test]
    fn test_fenced_content_is_accepted() {
        let line = json!({
            "custom_id": "row-000000",
            "response": {"status_code": 200, "body": {"choices": [{"message": {
                "content": format!("```json\n{}\n```", valid_content())
            }}]}}
        })
        .to_string();

        assert_eq!(classify(&line).status(), OutcomeStatus::Success);
    }

    #[test]
    fn test_http_status_mapping() {
        let line = |status: u16| {
            json!({
                "custom_id": "row-000000",
                "response": {"status_code": status, "body": {"error": {"message": "boom"}}}
            })
            .to_string()
        };

        assert_eq!(classify(&line(400)).status(), OutcomeStatus::InvalidInput);
        assert_eq!(classify(&line(422)).status(), OutcomeStatus::InvalidInput);
        assert_eq!(classify(&line(401)).status(), OutcomeStatus::Error);
        assert_eq!(classify(&line(403)).status(), OutcomeStatus::Error);
        assert_eq!(classify(&line(408)).status(), OutcomeStatus::Error);
        assert_eq!(classify(&line(429)).status(), OutcomeStatus::Error);
        assert_eq!(classify(&line(500)).status(), OutcomeStatus::Error);
        assert!(classify(&line(400)).reason().unwrap().contains("boom"));
    }

    #[test]
    fn test_error_object_mapping() {
        let line = |code: &str| {
            json!({
                "custom_id": "row-000000",
                "response": null,
                "error": {"code": code, "message": "details"}
            })
            .to_string()
        };

        assert_eq!(classify(&line("invalid_request")).status(), OutcomeStatus::InvalidInput);
        assert_eq!(classify(&line("server_error")).status(), OutcomeStatus::Error);
    }

    #[test]
    fn test_reconcile_fills_missing_and_ignores_orphans() {
        let records = vec![record(0, "1"), record(1, "2"), record(2, "3")];
        let output = [
            success_line("row-000002", valid_content()),
            "not json at all".to_string(),
            success_line("row-999999", valid_content()),
            success_line("row-000000", valid_content()),
            success_line("row-000000", json!({"status": "ERROR"})),
        ]
        .join("\n");

        let reconciliation = reconcile(&records, [output.as_str(), ""], &Taxonomy::builtin());

        assert_eq!(reconciliation.results.len(), 3);
        assert_eq!(reconciliation.missing, 1);
        assert_eq!(reconciliation.orphan_lines, 2);
        assert_eq!(reconciliation.duplicate_lines, 1);

        let ids: Vec<&str> = reconciliation.results.iter().map(|r| r.correlation_id.as_str()).collect();
        assert_eq!(ids, ["row-000000", "row-000001", "row-000002"]);
        assert_eq!(reconciliation.results[0].status(), OutcomeStatus::Success);
        assert_eq!(reconciliation.results[1], ClassificationResult::missing("row-000001"));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```\n{}```"), "{}");
        assert_eq!(strip_code_fence("  {} "), "{}");
    }
}
