//! Observer side of job progress.
//!
//! The executor never calls a sink directly. It pushes [`ProgressEvent`]s onto
//! a bounded channel and a dispatcher task feeds them to the sink, so a slow
//! sink only ever delays other sink calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::Job;

/// A job snapshot headed for a sink.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The job's progress record changed.
    Progress(Job),

    /// The job left RUNNING: finished, failed, cancelled, or waiting to retry.
    Complete(Job),
}

impl ProgressEvent {
    pub fn job(&self) -> &Job {
        match self {
            ProgressEvent::Progress(job) | ProgressEvent::Complete(job) => job,
        }
    }
}

/// Receives job snapshots. Has no write access to the store.
///
/// Implementations should mirror idempotently: each call carries the full
/// job, so overwriting the previous record is always correct.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, job: &Job);

    async fn on_complete(&self, job: &Job);
}

/// The task feeding a sink, plus the switch that winds it down.
pub(crate) struct Dispatcher {
    handle: JoinHandle<()>,
    close: oneshot::Sender<()>,
}

impl Dispatcher {
    /// Stop accepting events, deliver what is already queued, and give up
    /// after `grace`.
    ///
    /// Senders that are still alive (a reporter a handler held on to) do not
    /// keep the dispatcher open; their later sends are dropped.
    pub async fn finish(self, grace: Duration) {
        let Dispatcher { mut handle, close } = self;
        let _ = close.send(());
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "progress dispatcher ended abnormally"),
            Err(_) => {
                handle.abort();
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "progress sink too slow; undelivered events dropped"
                );
            }
        }
    }
}

/// Spawn the task that drains `rx` into `sink`.
///
/// It exits once the channel is closed and empty: either every sender is
/// gone or [`Dispatcher::finish`] was called.
pub(crate) fn spawn_dispatcher(
    sink: Arc<dyn ProgressSink>,
    mut rx: mpsc::Receiver<ProgressEvent>,
) -> Dispatcher {
    let (close, mut closed) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let mut delivered: u64 = 0;
        let mut closing = false;
        loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = &mut closed, if !closing => {
                    closing = true;
                    rx.close();
                    continue;
                }
            };
            let Some(event) = event else {
                break;
            };
            match &event {
                ProgressEvent::Progress(job) => sink.on_progress(job).await,
                ProgressEvent::Complete(job) => sink.on_complete(job).await,
            }
            delivered += 1;
        }
        debug!(delivered, "progress dispatcher finished");
    });
    Dispatcher { handle, close }
}

/// Logs every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl ProgressSink for TracingSink {
    async fn on_progress(&self, job: &Job) {
        debug!(
            job_id = %job.id,
            target = %job.target,
            percent = job.progress.percent,
            step = job.progress.current_step.as_deref().unwrap_or(""),
            items_completed = job.progress.items_completed,
            items_total = job.progress.items_total,
            "job progress"
        );
    }

    async fn on_complete(&self, job: &Job) {
        info!(
            job_id = %job.id,
            target = %job.target,
            status = %job.status,
            retry_count = job.retry_count,
            error = job.error.as_deref().unwrap_or(""),
            "job settled"
        );
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use crate::domain::JobType;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn job(target: &str) -> Job {
        Job::new(target, JobType::new("t"), 0, 0, BTreeMap::new(), Utc::now())
    }

    #[tokio::test]
    async fn dispatcher_delivers_in_order_and_exits_when_senders_drop() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(4);
        let dispatcher = spawn_dispatcher(sink.clone(), rx);

        tx.send(ProgressEvent::Progress(job("A"))).await.unwrap();
        tx.send(ProgressEvent::Complete(job("A"))).await.unwrap();
        tx.send(ProgressEvent::Complete(job("B"))).await.unwrap();
        drop(tx);
        dispatcher.handle.await.unwrap();

        let targets: Vec<String> = sink.completions().into_iter().map(|j| j.target).collect();
        assert_eq!(targets, vec!["A", "B"]);
        assert_eq!(sink.progress_count(), 1);
    }

    #[tokio::test]
    async fn finish_flushes_queue_despite_live_sender() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(4);
        let dispatcher = spawn_dispatcher(sink.clone(), rx);

        tx.send(ProgressEvent::Complete(job("A"))).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), dispatcher.finish(Duration::from_secs(5)))
            .await
            .expect("dispatcher kept waiting on a live sender");

        assert_eq!(sink.completions().len(), 1);
        assert!(tx.send(ProgressEvent::Complete(job("B"))).await.is_err());
    }

    struct StalledSink;

    #[async_trait]
    impl ProgressSink for StalledSink {
        async fn on_progress(&self, _job: &Job) {}

        async fn on_complete(&self, _job: &Job) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }

    #[tokio::test]
    async fn finish_gives_up_on_a_stalled_sink() {
        let (tx, rx) = mpsc::channel(4);
        let dispatcher = spawn_dispatcher(Arc::new(StalledSink), rx);
        tx.send(ProgressEvent::Complete(job("A"))).await.unwrap();
        tx.send(ProgressEvent::Complete(job("B"))).await.unwrap();

        let began = std::time::Instant::now();
        dispatcher.finish(Duration::from_millis(100)).await;
        assert!(began.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn event_exposes_its_job() {
        let event = ProgressEvent::Complete(job("A"));
        assert_eq!(event.job().target, "A");
    }
}
