//! Progress reporting handed to handlers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::domain::{JobId, ProgressUpdate};
use crate::progress::ProgressEvent;
use crate::store::JobStore;

/// Lets a running handler record how far along it is.
///
/// Each report is merged into the job, persisted, and forwarded to the
/// progress sink if one is attached. Reporting never fails the job: store
/// errors are logged and dropped.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    store: Arc<JobStore>,
    events: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressReporter {
    pub(crate) fn new(
        job_id: JobId,
        store: Arc<JobStore>,
        events: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Self {
        Self {
            job_id,
            store,
            events,
        }
    }

    /// A reporter that only writes to `store`.
    pub fn detached(job_id: JobId, store: Arc<JobStore>) -> Self {
        Self::new(job_id, store, None)
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub async fn report(&self, update: ProgressUpdate) {
        let job = match self.store.update_progress(self.job_id, &update).await {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "progress update not recorded");
                return;
            }
        };

        let Some(events) = &self.events else {
            return;
        };
        match events.try_send(ProgressEvent::Progress(job)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // a later snapshot supersedes this one
                debug!(job_id = %self.job_id, "progress channel full; snapshot dropped");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub async fn percent(&self, percent: f64) {
        self.report(ProgressUpdate::new().percent(percent)).await;
    }

    pub async fn step(&self, step: impl Into<String>) {
        self.report(ProgressUpdate::new().step(step)).await;
    }

    pub async fn items(&self, completed: u64, total: u64) {
        self.report(ProgressUpdate::new().items(completed, total)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Transition;
    use crate::store::NewJob;

    #[tokio::test]
    async fn reports_reach_store_and_channel() {
        let store = Arc::new(JobStore::in_memory());
        let job = store.enqueue(NewJob::new("A", "t")).await.unwrap();
        store.transition(job.id, Transition::Start).await.unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let reporter = ProgressReporter::new(job.id, store.clone(), Some(tx));

        reporter.items(1, 4).await;
        // channel is full now; this one is dropped but still persisted
        reporter.step("parsing").await;

        let stored = store.get(job.id).await.unwrap();
        assert_eq!(stored.progress.percent, 0.25);
        assert_eq!(stored.progress.current_step.as_deref(), Some("parsing"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.job().progress.items_completed, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_job_is_swallowed() {
        let store = Arc::new(JobStore::in_memory());
        let reporter = ProgressReporter::detached(JobId::generate(), store);
        reporter.percent(0.5).await;
    }
}
