//! PDF analysis jobs: records, queue, producer, workers, and status lookup.
//!
//! ## Lifecycle
//!
//! - The producer validates an upload, records the document, and enqueues a
//!   `queued` job in one store operation
//! - A worker pops the id, claims the job (`processing`), runs the analyzer,
//!   stores the analysis, and completes the job
//! - Anything that goes wrong after the claim is written to the job as `failed`
//! - The stall reaper fails jobs whose worker disappeared mid-run

pub mod producer;
pub mod reaper;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod status;
pub mod store;
pub mod types;
pub mod worker;

pub use producer::{normalize_query, EnqueueError, Enqueued, JobProducer, DEFAULT_QUERY};
pub use reaper::{StallReaper, WORKER_LOST};
#[cfg(feature = "redis")]
pub use redis_store::RedisJobStore;
pub use status::{JobStatusService, StatusError};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{progress, Job, JobStatus, JobUpdate};
pub use worker::{JobOutcome, JobWorker, TaskHandle, WorkerHandle, WorkerStats, DOCUMENT_MISSING};
