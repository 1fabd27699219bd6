//! Pipeline services

pub mod artifacts;
pub mod batch_client;
pub mod checkpoint_store;
pub mod csv_exporter;
pub mod input_preparer;
pub mod job_monitor;
pub mod job_submitter;
pub mod orchestrator;
pub mod prompt;
pub mod result_processor;
pub mod taxonomy;

pub use batch_client::{ApiClientError, BatchApi, HttpBatchClient};
pub use checkpoint_store::{CheckpointStore, RunLock};
pub use orchestrator::Pipeline;
pub use prompt::PromptBuilder;
pub use taxonomy::Taxonomy;
