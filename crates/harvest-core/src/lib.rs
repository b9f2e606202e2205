//! harvest-core
//!
//! A durable, resumable work queue for long-running extraction jobs.
//!
//! # Modules
//! - **domain**: the job record, its status machine, progress and results
//! - **store**: the crash-safe JSON job store
//! - **executor**: bounded worker pool, handlers and retry policy
//! - **progress**: observers fed from the executor
//! - **config**: executor tunables
//! - **error**: error types
//!
//! ```ignore
//! let store = Arc::new(JobStore::open("queue.json").await?);
//! store.enqueue(NewJob::new("12 Oak Ave", "property.extract")).await?;
//!
//! let executor = Executor::builder(store.clone())
//!     .handler("property.extract", MyHandler)
//!     .build();
//! executor.start(Some(Arc::new(TracingSink))).await?;
//! executor.wait().await;
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod progress;
pub mod store;

pub use config::ExecutorConfig;
pub use domain::{Job, JobId, JobProgress, JobResult, JobStatus, JobType, ProgressUpdate, Transition};
pub use error::{ExecutorError, HandlerError, StoreError};
pub use executor::{handler_fn, Executor, Handler, ProgressReporter, RetryPolicy, ShutdownReport};
pub use progress::{FileMirrorSink, ProgressEvent, ProgressSink, TracingSink};
pub use store::{JobStore, NewJob, QueueStats};
