//! Data model for the classification pipeline

pub mod batch_job;
pub mod checkpoint;
pub mod classification;
pub mod export;
pub mod record;

pub use batch_job::{BatchJob, JobStatus, RequestCounts};
pub use checkpoint::{Checkpoint, Phase, PipelineStep, CHECKPOINT_VERSION};
pub use classification::{
    Accessibility, Classification, ClassificationFields, ClassificationResult, Energy, Outcome,
    OutcomeStatus,
};
pub use export::ExportStats;
pub use record::{ClassificationRequest, InputRecord, Manifest};
