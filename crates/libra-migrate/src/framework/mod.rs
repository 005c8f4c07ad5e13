//! Generic chunked migration framework
//!
//! Reads ordered source pages, transforms records through a [`Transformer`],
//! upserts documents in bulk and composes steps into dependency-ordered stages.
//! Entity-specific wiring lives in [`crate::library`].

pub mod types;
pub mod source;
pub mod writer;
pub mod retry;
pub mod partition;
pub mod listener;
pub mod worker;
pub mod coordinator;
pub mod runs;

// Re-export commonly used types
pub use types::{
    JobExecution, JobParameters, JobState, JobStatus, StepCounters, StepExecution, StepStatus,
    StepSummary,
};
pub use source::{PageQuery, SourceReader, SourceRecord};
pub use writer::{BulkWriter, Document, DocumentRow, DocumentStore, UpsertSummary};
pub use retry::RetryPolicy;
pub use partition::{ModulusPartitioner, Partition};
pub use worker::{ChunkStep, Step, StepSettings, Transformer};
pub use coordinator::{MigrationJob, MigrationJobBuilder, Stage, WorkerPool};
pub use runs::{RunRecord, RunRepository};
