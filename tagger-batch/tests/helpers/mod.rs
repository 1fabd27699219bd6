//! Test Helper Utilities
//!
//! Shared utilities for testing tagger-batch

#![allow(dead_code)]

pub mod fixtures;
pub mod scripted_api;

// Re-export commonly used items
pub use fixtures::{
    classified_line, open_pipeline, output_line, rejected_request_line, test_config, write_csv,
    THREE_SONGS,
};
pub use scripted_api::{ScriptedBatchApi, ERROR_FILE_ID, OUTPUT_FILE_ID};
