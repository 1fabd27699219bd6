//! Export summary statistics

use super::{ClassificationResult, OutcomeStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Outcome counts for one exported result set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportStats {
    pub total: usize,
    pub success: usize,
    pub error: usize,
    pub requires_review: usize,
    pub invalid_input: usize,
    pub output_path: PathBuf,
}

impl ExportStats {
    /// Count each outcome status in `results`
    pub fn tally(results: &[ClassificationResult], output_path: PathBuf) -> Self {
        let mut stats = ExportStats {
            output_path,
            ..Default::default()
        };

        for result in results {
            stats.total += 1;
            match result.status() {
                OutcomeStatus::Success => stats.success += 1,
                OutcomeStatus::Error => stats.error += 1,
                OutcomeStatus::RequiresHumanReview => stats.requires_review += 1,
                OutcomeStatus::InvalidInput => stats.invalid_input += 1,
            }
        }

        stats
    }

    /// Every record falls into exactly one outcome bucket
    pub fn is_partition(&self) -> bool {
        self.success + self.error + self.requires_review + self.invalid_input == self.total
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} records: {} success, {} error, {} requires review, {} invalid input → {}",
            self.total,
            self.success,
            self.error,
            self.requires_review,
            self.invalid_input,
            self.output_path.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;

    #[test]
    fn test_tally_partitions_results() {
        let results = vec![
            ClassificationResult::missing("row-000000"),
            ClassificationResult::new("row-000001", Outcome::invalid_input("bad title")),
            ClassificationResult::missing("row-000002"),
        ];

        let stats = ExportStats::tally(&results, PathBuf::from("out.csv"));
        assert_eq!(stats.total, 3);
        assert_eq!(stats.error, 2);
        assert_eq!(stats.invalid_input, 1);
        assert_eq!(stats.success, 0);
        assert!(stats.is_partition());
    }
}
