//! Classification outcomes
//!
//! Every accepted input record ends with exactly one [`ClassificationResult`].
//! [`Outcome`] is closed: exporter and statistics match on all four variants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Perceived energy of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Energy {
    #[serde(rename = "Very Low")]
    VeryLow,
    Low,
    Medium,
    High,
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl Energy {
    pub const ALL: [Energy; 5] = [
        Energy::VeryLow,
        Energy::Low,
        Energy::Medium,
        Energy::High,
        Energy::VeryHigh,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Energy::VeryLow => "Very Low",
            Energy::Low => "Low",
            Energy::Medium => "Medium",
            Energy::High => "High",
            Energy::VeryHigh => "Very High",
        }
    }

    /// Case-insensitive; `very_low` and `very-low` are accepted spellings
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = normalize_label(value);
        Self::ALL
            .into_iter()
            .find(|e| normalize_label(e.label()) == normalized)
    }
}

/// How mainstream a track is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accessibility {
    Eclectic,
    Timeless,
    Commercial,
    Cheesy,
}

impl Accessibility {
    pub const ALL: [Accessibility; 4] = [
        Accessibility::Eclectic,
        Accessibility::Timeless,
        Accessibility::Commercial,
        Accessibility::Cheesy,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Accessibility::Eclectic => "Eclectic",
            Accessibility::Timeless => "Timeless",
            Accessibility::Commercial => "Commercial",
            Accessibility::Cheesy => "Cheesy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = normalize_label(value);
        Self::ALL
            .into_iter()
            .find(|a| normalize_label(a.label()) == normalized)
    }
}

fn normalize_label(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c.to_ascii_lowercase() })
        .collect()
}

/// Validated classification of one song
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub subgenre: String,
    #[serde(default)]
    pub secondary_subgenres: Vec<String>,
    pub energy: Energy,
    pub accessibility: Accessibility,
    #[serde(default)]
    pub reasoning: String,
}

/// Raw fields of a response that could not be validated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationFields {
    pub subgenre: Option<String>,
    #[serde(default)]
    pub secondary_subgenres: Vec<String>,
    pub energy: Option<String>,
    pub accessibility: Option<String>,
    pub reasoning: Option<String>,
}

/// Outcome of classifying one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Well-formed response with every field inside its domain
    Success { classification: Classification },
    /// Unparseable line/content or remote execution failure
    Error { reason: String },
    /// Well-formed response failing a required-field or domain check
    RequiresHumanReview {
        fields: ClassificationFields,
        reason: String,
    },
    /// Remote service rejected the request itself
    InvalidInput { reason: String },
}

/// Discriminant of [`Outcome`], used for counting and the CSV `status` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeStatus {
    Success,
    Error,
    RequiresHumanReview,
    InvalidInput,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Success => "SUCCESS",
            OutcomeStatus::Error => "ERROR",
            OutcomeStatus::RequiresHumanReview => "REQUIRES_HUMAN_REVIEW",
            OutcomeStatus::InvalidInput => "INVALID_INPUT",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Outcome {
    pub fn error(reason: impl Into<String>) -> Self {
        Outcome::Error { reason: reason.into() }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Outcome::InvalidInput { reason: reason.into() }
    }

    pub fn status(&self) -> OutcomeStatus {
        match self {
            Outcome::Success { .. } => OutcomeStatus::Success,
            Outcome::Error { .. } => OutcomeStatus::Error,
            Outcome::RequiresHumanReview { .. } => OutcomeStatus::RequiresHumanReview,
            Outcome::InvalidInput { .. } => OutcomeStatus::InvalidInput,
        }
    }

    /// Explanation for non-SUCCESS outcomes
    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Error { reason }
            | Outcome::RequiresHumanReview { reason, .. }
            | Outcome::InvalidInput { reason } => Some(reason),
        }
    }
}

/// Classification outcome correlated to one input record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub correlation_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ClassificationResult {
    pub fn new(correlation_id: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome,
        }
    }

    /// Synthesized for a record the remote output never mentioned
    pub fn missing(correlation_id: impl Into<String>) -> Self {
        Self::new(correlation_id, Outcome::error("missing result"))
    }

    pub fn status(&self) -> OutcomeStatus {
        self.outcome.status()
    }
}
