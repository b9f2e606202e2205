//! The executor: a bounded pool that drives the store to completion.

use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::decision::decide;
use super::handler::Handler;
use super::in_flight::{InFlight, InFlightGuard};
use super::registry::HandlerRegistry;
use super::reporter::ProgressReporter;
use super::retry::RetryPolicy;
use crate::config::ExecutorConfig;
use crate::domain::{Job, JobId, JobResult, JobStatus, JobType};
use crate::error::{ExecutorError, HandlerError, StoreError};
use crate::progress::sink::{spawn_dispatcher, Dispatcher};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::store::JobStore;

/// Floor on how long `stop` waits for the main loop after aborting jobs.
const MIN_SETTLE: Duration = Duration::from_millis(500);

/// What `stop` observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The executor wound down before the timeout.
    pub completed_in_time: bool,

    /// Jobs whose tasks were aborted. They are left RUNNING for the next
    /// startup's stuck-job recovery.
    pub aborted: Vec<JobId>,
}

/// State shared between the executor handle, its main loop and job tasks.
struct Shared {
    store: Arc<JobStore>,
    config: ExecutorConfig,
    handlers: RwLock<HandlerRegistry>,
    in_flight: InFlight,
    stop_tx: watch::Sender<bool>,
    running_tx: watch::Sender<bool>,
    events: Mutex<Option<mpsc::Sender<ProgressEvent>>>,
}

impl Shared {
    fn events(&self) -> Option<mpsc::Sender<ProgressEvent>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_events(&self) -> Option<mpsc::Sender<ProgressEvent>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn emit_complete(&self, job: Job) {
        if let Some(events) = self.events() {
            // fails once the dispatcher has closed the channel
            let _ = events.send(ProgressEvent::Complete(job)).await;
        }
    }
}

/// Runs jobs from a [`JobStore`] through registered handlers.
///
/// - At most `max_concurrent` jobs run at once (semaphore).
/// - Failed attempts are retried with backoff until the job's budget is spent.
/// - Jobs left RUNNING by a crash are reclaimed on `start`.
///
/// All state lives in the store; the executor only holds ids of in-flight jobs.
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    pub fn builder(store: Arc<JobStore>) -> ExecutorBuilder {
        ExecutorBuilder::new(store)
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.shared.store
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    /// Register a handler for a job type. May be called while running.
    pub async fn register_handler(&self, job_type: impl Into<JobType>, handler: impl Handler + 'static) {
        self.shared
            .handlers
            .write()
            .await
            .register(job_type.into(), Arc::new(handler));
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running_tx.borrow()
    }

    /// Jobs currently being processed.
    pub fn in_flight(&self) -> Vec<JobId> {
        self.shared.in_flight.ids()
    }

    /// Recover stuck jobs, then start pulling work in the background.
    ///
    /// The executor runs until the queue drains (no pending jobs, no retries
    /// waiting, nothing in flight) or until [`stop`](Self::stop).
    pub async fn start(&self, sink: Option<Arc<dyn ProgressSink>>) -> Result<(), ExecutorError> {
        let mut claimed = false;
        self.shared.running_tx.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                claimed = true;
                true
            }
        });
        if !claimed {
            return Err(ExecutorError::AlreadyRunning);
        }
        self.shared.stop_tx.send_replace(false);

        let recovered = match self.shared.store.reset_stuck(self.shared.config.stuck_timeout).await {
            Ok(n) => n,
            Err(e) => {
                self.shared.running_tx.send_replace(false);
                return Err(e.into());
            }
        };
        if recovered > 0 {
            warn!(recovered, "reclaimed jobs interrupted by a previous run");
        }

        let dispatcher = sink.map(|sink| {
            let (tx, rx) = mpsc::channel(self.shared.config.progress_channel_capacity.max(1));
            *self.shared.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
            spawn_dispatcher(sink, rx)
        });

        info!(
            max_concurrent = self.shared.config.max_concurrent,
            handlers = self.shared.handlers.read().await.len(),
            "executor started"
        );

        let shared = Arc::clone(&self.shared);
        tokio::spawn(run(shared, dispatcher));
        Ok(())
    }

    /// Wait until the main loop exits, either because the queue drained or
    /// because of `stop`.
    pub async fn wait(&self) {
        let mut running = self.shared.running_tx.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }

    /// Stop taking new work.
    ///
    /// With `wait`, in-flight jobs get up to `timeout` to finish. Whatever is
    /// still running after that is aborted and left RUNNING, to be reclaimed
    /// by the next `start`. Without `wait`, in-flight jobs finish in the
    /// background.
    ///
    /// After an abort, queued sink events get `flush_timeout` to drain, so a
    /// timed-out stop returns within roughly `timeout + 2 * flush_timeout`.
    pub async fn stop(&self, wait: bool, timeout: Duration) -> Result<ShutdownReport, ExecutorError> {
        if !self.is_running() {
            return Err(ExecutorError::NotRunning);
        }
        info!(
            wait,
            timeout_ms = timeout.as_millis() as u64,
            in_flight = self.shared.in_flight.len(),
            "stopping executor"
        );
        self.shared.stop_tx.send_replace(true);

        if !wait {
            return Ok(ShutdownReport {
                completed_in_time: !self.is_running(),
                aborted: Vec::new(),
            });
        }

        let mut running = self.shared.running_tx.subscribe();
        let finished = tokio::time::timeout(timeout, running.wait_for(|running| !*running))
            .await
            .is_ok();
        if finished {
            info!("executor stopped");
            return Ok(ShutdownReport {
                completed_in_time: true,
                aborted: Vec::new(),
            });
        }

        let aborted = self.shared.in_flight.abort_all();
        warn!(
            count = aborted.len(),
            jobs = ?aborted,
            "shutdown timed out; aborted in-flight jobs, left for recovery"
        );
        // aborted tasks end at once; the sink flush is bounded by flush_timeout
        let settle = self.shared.config.flush_timeout.saturating_mul(2).max(MIN_SETTLE);
        if tokio::time::timeout(settle, running.wait_for(|running| !*running))
            .await
            .is_ok()
        {
            info!("executor stopped");
        } else {
            warn!(
                settle_ms = settle.as_millis() as u64,
                "executor main loop still winding down"
            );
        }

        Ok(ShutdownReport {
            completed_in_time: false,
            aborted,
        })
    }

    /// Abort a job: kill its task if it is in flight and mark it CANCELLED.
    pub async fn cancel(&self, id: JobId) -> Result<Job, ExecutorError> {
        if let Some(task) = self.shared.in_flight.remove(id) {
            task.abort();
            info!(job_id = %id, "aborted in-flight job");
        }
        let job = self.shared.store.cancel(id).await?;
        info!(job_id = %job.id, target = %job.target, "job cancelled");
        self.shared.emit_complete(job.clone()).await;
        Ok(job)
    }
}

/// Fluent construction of an [`Executor`].
pub struct ExecutorBuilder {
    store: Arc<JobStore>,
    config: ExecutorConfig,
    registry: HandlerRegistry,
}

impl ExecutorBuilder {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self {
            store,
            config: ExecutorConfig::default(),
            registry: HandlerRegistry::new(),
        }
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.max_concurrent = n;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn stuck_timeout(mut self, timeout: Duration) -> Self {
        self.config.stuck_timeout = timeout;
        self
    }

    pub fn handler(mut self, job_type: impl Into<JobType>, handler: impl Handler + 'static) -> Self {
        self.registry.register(job_type.into(), Arc::new(handler));
        self
    }

    pub fn build(self) -> Executor {
        let (stop_tx, _) = watch::channel(false);
        let (running_tx, _) = watch::channel(false);
        Executor {
            shared: Arc::new(Shared {
                store: self.store,
                config: self.config,
                handlers: RwLock::new(self.registry),
                in_flight: InFlight::default(),
                stop_tx,
                running_tx,
                events: Mutex::new(None),
            }),
        }
    }
}

/// Main loop: claim, spawn, repeat; then drain.
async fn run(shared: Arc<Shared>, dispatcher: Option<Dispatcher>) {
    let semaphore = Arc::new(Semaphore::new(shared.config.max_concurrent.max(1)));
    let notify = shared.store.notifier();
    let mut stop_rx = shared.stop_tx.subscribe();
    let mut tasks: JoinSet<()> = JoinSet::new();

    loop {
        while let Some(res) = tasks.try_join_next() {
            log_join(res);
        }
        if *stop_rx.borrow_and_update() {
            break;
        }

        let permit = tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        // both branches may have been ready; stop wins
        if *stop_rx.borrow() {
            drop(permit);
            break;
        }

        match shared.store.claim_next().await {
            Ok(Some(job)) => {
                let id = job.id;
                let task_shared = Arc::clone(&shared);
                shared.in_flight.register(id, || {
                    tasks.spawn(process(task_shared, job, permit))
                });
            }
            Ok(None) => {
                drop(permit);
                let next_retry = shared.store.earliest_retry_at().await;
                if tasks.is_empty() && next_retry.is_none() {
                    info!("queue drained");
                    break;
                }

                let mut pause = shared.config.poll_interval;
                if let Some(at) = next_retry {
                    let until = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    pause = pause.min(until);
                }
                tokio::select! {
                    _ = stop_rx.changed() => {}
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep(pause) => {}
                    Some(res) = tasks.join_next(), if !tasks.is_empty() => log_join(res),
                }
            }
            Err(e) => {
                drop(permit);
                error!(error = %e, "could not claim next job");
                tokio::select! {
                    _ = stop_rx.changed() => {}
                    _ = tokio::time::sleep(shared.config.poll_interval) => {}
                }
            }
        }
    }

    if !tasks.is_empty() {
        info!(in_flight = tasks.len(), "waiting for in-flight jobs");
    }
    while let Some(res) = tasks.join_next().await {
        log_join(res);
    }

    drop(shared.take_events());
    if let Some(dispatcher) = dispatcher {
        dispatcher.finish(shared.config.flush_timeout).await;
    }

    info!("executor main loop exited");
    shared.running_tx.send_replace(false);
}

fn log_join(res: Result<(), JoinError>) {
    match res {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => debug!("job task aborted"),
        Err(e) => error!(error = %e, "job task failed"),
    }
}

/// Run one claimed (already RUNNING) job and record the outcome.
async fn process(shared: Arc<Shared>, job: Job, permit: OwnedSemaphorePermit) {
    let _guard = InFlightGuard::new(shared.in_flight.clone(), job.id, permit);
    info!(
        job_id = %job.id,
        target = %job.target,
        job_type = %job.job_type,
        attempt = job.retry_count + 1,
        "job started"
    );

    let started = Instant::now();
    let outcome = invoke(&shared, &job).await.map(|result| {
        if result.duration_seconds > 0.0 {
            result
        } else {
            result.with_duration(started.elapsed().as_secs_f64())
        }
    });

    let transition = decide(&job, outcome, &shared.config.retry);
    match shared.store.transition(job.id, transition).await {
        Ok(settled) => {
            log_settled(&settled);
            shared.emit_complete(settled).await;
        }
        Err(e @ StoreError::InvalidTransition { .. }) => {
            error!(job_id = %job.id, error = %e, "job changed state while running");
        }
        Err(e) => {
            // left RUNNING; stuck-job recovery picks it up on the next start
            error!(job_id = %job.id, error = %e, "failed to record job outcome");
        }
    }
}

fn log_settled(job: &Job) {
    let error = job.error.as_deref().unwrap_or("");
    match job.status {
        JobStatus::Completed => info!(
            job_id = %job.id,
            target = %job.target,
            duration_secs = job.result.as_ref().map_or(0.0, |r| r.duration_seconds),
            "job completed"
        ),
        JobStatus::Retrying => {
            let delay_ms = job
                .next_retry_at
                .zip(job.last_retry_at)
                .map_or(0, |(next, last)| (next - last).num_milliseconds());
            warn!(
                job_id = %job.id,
                target = %job.target,
                retry_count = job.retry_count,
                max_retries = job.max_retries,
                delay_ms,
                error,
                "job failed; retry scheduled"
            );
        }
        status => warn!(
            job_id = %job.id,
            target = %job.target,
            status = %status,
            retry_count = job.retry_count,
            error,
            "job failed permanently"
        ),
    }
}

/// Call the job's handler in its own task so a panic stays contained.
async fn invoke(shared: &Arc<Shared>, job: &Job) -> Result<JobResult, HandlerError> {
    let handler = shared.handlers.read().await.get(&job.job_type);
    let Some(handler) = handler else {
        return Err(HandlerError::permanent(format!(
            "no handler for type {}",
            job.job_type
        )));
    };

    let reporter = ProgressReporter::new(job.id, Arc::clone(&shared.store), shared.events());
    let snapshot = job.clone();
    let mut task = AbortOnDrop(tokio::spawn(async move {
        handler.handle(snapshot, reporter).await
    }));

    match (&mut task.0).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(HandlerError::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(HandlerError::failed(format!("handler task ended: {e}"))),
    }
}

/// Aborts the wrapped task when dropped, so aborting a job task also stops
/// its handler.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
