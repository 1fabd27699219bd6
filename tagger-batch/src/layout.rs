//! Run folder layout
//!
//! One run folder holds every artifact of a single batch run plus its
//! checkpoint and lock file.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn checkpoint(&self) -> PathBuf {
        self.root.join("checkpoint.json")
    }

    pub fn lock(&self) -> PathBuf {
        self.root.join("run.lock")
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    /// Accepted input records, one JSON object per line, in input order
    pub fn records(&self) -> PathBuf {
        self.root.join("records.jsonl")
    }

    /// Batch request file uploaded to the remote service
    pub fn requests(&self) -> PathBuf {
        self.root.join("requests.jsonl")
    }

    /// Rows rejected during preparation, with reasons
    pub fn rejected(&self) -> PathBuf {
        self.root.join("rejected.csv")
    }

    /// Downloaded output artifact
    pub fn output(&self) -> PathBuf {
        self.root.join("output.jsonl")
    }

    /// Downloaded error artifact
    pub fn errors(&self) -> PathBuf {
        self.root.join("errors.jsonl")
    }

    /// Processed result set
    pub fn results(&self) -> PathBuf {
        self.root.join("results.jsonl")
    }

    pub fn default_export(&self) -> PathBuf {
        self.root.join("classified.csv")
    }
}
