//! Input records, batch request lines and the preparation manifest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One accepted song row from the source dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    /// Zero-based data row in the source file (header excluded)
    pub row: usize,
    /// Key linking this record to its classification result
    pub correlation_id: String,
    pub id: String,
    pub title: String,
    pub artist: String,
    /// Every source column in header order, verbatim
    pub fields: Vec<String>,
}

impl InputRecord {
    /// Deterministic correlation id for a source row
    pub fn correlation_id_for_row(row: usize) -> String {
        format!("row-{:06}", row)
    }
}

/// One line of the batch request file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRequest {
    #[serde(rename = "custom_id")]
    pub correlation_id: String,
    pub method: String,
    pub url: String,
    #[serde(rename = "body")]
    pub payload: serde_json::Value,
}

impl ClassificationRequest {
    pub fn new(correlation_id: String, endpoint: &str, payload: serde_json::Value) -> Self {
        Self {
            correlation_id,
            method: "POST".to_string(),
            url: endpoint.to_string(),
            payload,
        }
    }
}

/// Summary of the prepare phase, used later to validate completeness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub source: PathBuf,
    /// Source header, in order
    pub columns: Vec<String>,
    pub total_accepted: usize,
    pub total_rejected: usize,
    pub created_at: DateTime<Utc>,
}
