//! Domain model: ids, statuses, progress, results and the job record.

pub mod ids;
pub mod job;
pub mod job_type;
pub mod outcome;
pub mod progress;
pub mod status;

pub use ids::JobId;
pub use job::{InvalidTransition, Job, Transition};
pub use job_type::JobType;
pub use outcome::JobResult;
pub use progress::{JobProgress, ProgressUpdate};
pub use status::JobStatus;
