//! # Tagger Common Library
//!
//! Shared code for the song tagger tools including:
//! - Error types
//! - TOML configuration loading and run folder resolution
//! - Atomic file writes
//! - Human-readable duration formatting

pub mod config;
pub mod error;
pub mod fs;
pub mod human_time;

pub use error::{Error, Result};
