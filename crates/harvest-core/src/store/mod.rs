//! Persistent job storage.

pub mod job_store;
pub mod ordering;
pub mod persist;
pub mod state;
pub mod stats;

pub use job_store::{JobStore, NewJob, DEFAULT_MAX_RETRIES};
pub use state::{JobQueueState, SCHEMA_VERSION};
pub use stats::QueueStats;
