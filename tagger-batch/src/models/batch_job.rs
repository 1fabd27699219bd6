//! Remote batch job representation
//!
//! Owned by the remote service; the pipeline only observes it.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Remote job status
///
/// Non-terminal: validating, in_progress, finalizing, cancelling.
/// Terminal: completed, failed, expired, cancelled.
/// Any other string is kept as `Unknown` and treated as non-terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelling,
    Cancelled,
    Unknown(String),
}

impl JobStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "validating" => JobStatus::Validating,
            "in_progress" => JobStatus::InProgress,
            "finalizing" => JobStatus::Finalizing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "expired" => JobStatus::Expired,
            "cancelling" => JobStatus::Cancelling,
            "cancelled" => JobStatus::Cancelled,
            other => JobStatus::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Validating => "validating",
            JobStatus::InProgress => "in_progress",
            JobStatus::Finalizing => "finalizing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Unknown(raw) => raw,
        }
    }

    /// No further transition occurs from this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Expired | JobStatus::Cancelled
        )
    }

    /// Terminal without usable output; needs operator action
    pub fn is_failure(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Expired | JobStatus::Cancelled)
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        JobStatus::parse(&value)
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job request counters, monotonically non-decreasing until terminal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
}

impl RequestCounts {
    /// Requests that reached an end state, successful or not
    pub fn finished(&self) -> u64 {
        self.completed + self.failed
    }

    /// True if any counter moved backwards relative to `previous`
    pub fn regressed_from(&self, previous: &RequestCounts) -> bool {
        self.total < previous.total
            || self.completed < previous.completed
            || self.failed < previous.failed
    }
}

/// Batch job as returned by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub input_file_id: String,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub request_counts: RequestCounts,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        for status in ["completed", "failed", "expired", "cancelled"] {
            assert!(JobStatus::parse(status).is_terminal(), "{status}");
        }
        for status in ["validating", "in_progress", "finalizing", "cancelling", "paused"] {
            assert!(!JobStatus::parse(status).is_terminal(), "{status}");
        }
        assert!(!JobStatus::Completed.is_failure());
        assert!(JobStatus::Expired.is_failure());
    }

    #[test]
    fn test_unknown_status_keeps_raw_value() {
        let status = JobStatus::parse("paused");
        assert_eq!(status, JobStatus::Unknown("paused".to_string()));
        assert_eq!(status.to_string(), "paused");
    }

    #[test]
    fn test_deserialize_remote_job() {
        let job: BatchJob = serde_json::from_str(
            r#"{
                "id": "batch_abc",
                "object": "batch",
                "status": "in_progress",
                "input_file_id": "file-in",
                "output_file_id": null,
                "error_file_id": null,
                "request_counts": {"total": 10, "completed": 4, "failed": 1}
            }"#,
        )
        .unwrap();

        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.request_counts.finished(), 5);
        assert!(job.output_file_id.is_none());
    }

    #[test]
    fn test_null_request_counts_default_to_zero() {
        let job: BatchJob =
            serde_json::from_str(r#"{"id": "b", "status": "validating", "request_counts": null}"#)
                .unwrap();
        assert_eq!(job.request_counts, RequestCounts::default());
    }

    #[test]
    fn test_regression_detection() {
        let before = RequestCounts { total: 10, completed: 5, failed: 0 };
        let after = RequestCounts { total: 10, completed: 4, failed: 0 };
        assert!(after.regressed_from(&before));
        assert!(!before.regressed_from(&after));
    }
}
