use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::reporter::ProgressReporter;
use crate::domain::{Job, JobResult};
use crate::error::HandlerError;

/// Does the actual work for one job type.
///
/// The handler gets an owned snapshot of the job and a reporter for progress.
/// Returning `Err` or `Ok` with `success == false` counts as a failed attempt;
/// a panic is caught and treated the same way.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, job: Job, progress: ProgressReporter) -> Result<JobResult, HandlerError>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, job: Job, progress: ProgressReporter) -> Result<JobResult, HandlerError> {
        (**self).handle(job, progress).await
    }
}

/// Adapter that turns an async closure into a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Job, ProgressReporter) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JobResult, HandlerError>> + Send,
{
    async fn handle(&self, job: Job, progress: ProgressReporter) -> Result<JobResult, HandlerError> {
        (self.f)(job, progress).await
    }
}

/// Build a handler from an async closure.
///
/// ```ignore
/// let h = handler_fn(|job: Job, _progress| async move {
///     println!("working on {}", job.target);
///     Ok(JobResult::success())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Job, ProgressReporter) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JobResult, HandlerError>> + Send,
{
    FnHandler { f }
}
