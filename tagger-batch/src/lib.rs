//! tagger-batch library interface
//!
//! Drives a song catalog through an asynchronous batch-classification API:
//! prepare → submit → monitor → process → export, with a durable checkpoint
//! between every phase so any run can be resumed after interruption.

pub mod config;
pub mod error;
pub mod layout;
pub mod models;
pub mod services;

pub use crate::error::{PipelineError, PipelineResult};
pub use crate::services::orchestrator::{Pipeline, RunFailure, RunSummary};
