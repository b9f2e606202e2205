//! The persistent job store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use super::ordering::{pending_order, recent_first, retry_order, select_next};
use super::persist::{load_state, write_json_atomic};
use super::state::JobQueueState;
use super::stats::QueueStats;
use crate::domain::{Job, JobId, JobStatus, JobType, ProgressUpdate, Transition};
use crate::error::StoreError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Parameters for a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub target: String,
    pub job_type: JobType,
    pub priority: i32,
    pub max_retries: u32,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl NewJob {
    pub fn new(target: impl Into<String>, job_type: impl Into<JobType>) -> Self {
        Self {
            target: target.into(),
            job_type: job_type.into(),
            priority: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            metadata: BTreeMap::new(),
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Same settings, different target.
    pub fn for_target(&self, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..self.clone()
        }
    }
}

/// Single source of truth for job state.
///
/// Design:
/// - Every mutation runs under one lock and is written to disk before the
///   lock is released, so writes are serialized.
/// - If the write fails the in-memory state is left as it was; memory never
///   runs ahead of disk.
/// - Only one process is expected to own a given state file.
pub struct JobStore {
    state: Mutex<JobQueueState>,
    path: Option<PathBuf>,
    notify: Arc<Notify>,
}

impl JobStore {
    /// Load the store at `path`, creating an empty one if the file is missing
    /// and quarantining it if it is unreadable.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = load_state(&path).await?;
        info!(
            path = %path.display(),
            jobs = state.jobs.len(),
            "job store opened"
        );
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
            notify: Arc::new(Notify::new()),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(JobQueueState::new(Utc::now())),
            path: None,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Signalled after every successful mutation.
    pub(crate) fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Apply `f` to a draft of the state and commit it once it is on disk.
    ///
    /// The live state is only replaced after a successful write, so an error
    /// or a dropped future leaves it untouched.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut JobQueueState, DateTime<Utc>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock().await;
        let mut draft = state.clone();
        let now = Utc::now();

        let out = f(&mut draft, now)?;
        draft.updated_at = now;

        if let Some(path) = &self.path {
            write_json_atomic(path, &draft).await?;
        }
        *state = draft;
        drop(state);

        self.notify.notify_one();
        Ok(out)
    }

    /// Write the current state to disk.
    pub async fn save(&self) -> Result<(), StoreError> {
        let state = self.state.lock().await;
        match &self.path {
            Some(path) => write_json_atomic(path, &*state).await,
            None => Ok(()),
        }
    }

    /// Submit work for a target.
    ///
    /// If the target already has a pending, running or retrying job, that job
    /// is returned and nothing is created or written.
    pub async fn enqueue(&self, request: NewJob) -> Result<Job, StoreError> {
        let existing = self.state.lock().await.active_for_target(&request.target).cloned();
        if let Some(existing) = existing {
            debug!(
                job_id = %existing.id,
                target = %existing.target,
                status = %existing.status,
                "target already queued; returning existing job"
            );
            return Ok(existing);
        }

        self.mutate(|state, now| {
            // another enqueue may have landed in between
            if let Some(existing) = state.active_for_target(&request.target) {
                return Ok(existing.clone());
            }

            let job = Job::new(
                request.target,
                request.job_type,
                request.priority,
                request.max_retries,
                request.metadata,
                now,
            );
            info!(
                job_id = %job.id,
                target = %job.target,
                job_type = %job.job_type,
                priority = job.priority,
                "job enqueued"
            );
            state.jobs.push(job.clone());
            state.total_submitted += 1;
            Ok(job)
        })
        .await
    }

    /// Enqueue one job per target. Each target succeeds or fails on its own.
    pub async fn enqueue_batch<I, S>(&self, targets: I, template: &NewJob) -> Vec<Result<Job, StoreError>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut results = Vec::new();
        for target in targets {
            let target = target.into();
            let result = self.enqueue(template.for_target(target.clone())).await;
            if let Err(e) = &result {
                warn!(target = %target, error = %e, "batch enqueue failed for target");
            }
            results.push(result);
        }
        results
    }

    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.state.lock().await.get(id).cloned()
    }

    /// The most recent job for `target`.
    pub async fn get_by_target(&self, target: &str) -> Option<Job> {
        let state = self.state.lock().await;
        state
            .jobs
            .iter()
            .filter(|job| job.target == target)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .cloned()
    }

    /// Jobs matching `predicate`, sorted by `order`, at most `limit`.
    pub async fn list_by(
        &self,
        predicate: impl Fn(&Job) -> bool,
        order: impl FnMut(&Job, &Job) -> std::cmp::Ordering,
        limit: Option<usize>,
    ) -> Vec<Job> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state.jobs.iter().filter(|j| predicate(j)).cloned().collect();
        let mut order = order;
        jobs.sort_by(|a, b| order(a, b));
        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        jobs
    }

    pub async fn list_pending(&self, limit: Option<usize>) -> Vec<Job> {
        self.list_by(|j| j.status == JobStatus::Pending, pending_order, limit)
            .await
    }

    pub async fn list_retrying(&self) -> Vec<Job> {
        self.list_by(|j| j.status == JobStatus::Retrying, retry_order, None)
            .await
    }

    pub async fn list_running(&self, limit: Option<usize>) -> Vec<Job> {
        self.list_by(
            |j| j.status == JobStatus::Running,
            |a, b| a.started_at.cmp(&b.started_at),
            limit,
        )
        .await
    }

    pub async fn list_completed(&self, limit: Option<usize>) -> Vec<Job> {
        self.list_by(|j| j.status == JobStatus::Completed, recent_first, limit)
            .await
    }

    pub async fn list_failed(&self, limit: Option<usize>) -> Vec<Job> {
        self.list_by(|j| j.status == JobStatus::Failed, recent_first, limit)
            .await
    }

    /// The best candidate to run next: a due retry, else the top pending job.
    pub async fn next_job(&self) -> Option<Job> {
        let state = self.state.lock().await;
        select_next(&state.jobs, Utc::now()).cloned()
    }

    /// Select the next job and move it to running in one step.
    pub async fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        self.mutate(|state, now| {
            let Some(id) = select_next(&state.jobs, now).map(|job| job.id) else {
                return Ok(None);
            };
            apply(state, id, Transition::Start, now).map(Some)
        })
        .await
    }

    /// Apply one state-machine edge to a job and persist it.
    pub async fn transition(&self, id: JobId, transition: Transition) -> Result<Job, StoreError> {
        self.mutate(|state, now| apply(state, id, transition, now))
            .await
    }

    /// Abort a running job.
    pub async fn cancel(&self, id: JobId) -> Result<Job, StoreError> {
        self.transition(id, Transition::Cancel).await
    }

    /// Merge a progress report into a running job. Reports for jobs that are
    /// no longer running are ignored.
    pub async fn update_progress(&self, id: JobId, update: &ProgressUpdate) -> Result<Job, StoreError> {
        self.mutate(|state, now| {
            let job = state.get_mut(id).ok_or(StoreError::NotFound(id))?;
            if job.status == JobStatus::Running {
                job.update_progress(update, now);
            } else {
                debug!(job_id = %id, status = %job.status, "progress for non-running job ignored");
            }
            Ok(job.clone())
        })
        .await
    }

    /// Reclaim jobs left running longer than `timeout`, typically by a crash.
    ///
    /// Each goes to retrying if it has retries left, otherwise to failed.
    /// Returns how many jobs were reset.
    pub async fn reset_stuck(&self, timeout: Duration) -> Result<usize, StoreError> {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        self.mutate(|state, now| {
            let stuck: Vec<JobId> = state
                .jobs
                .iter()
                .filter(|job| job.status == JobStatus::Running)
                .filter(|job| {
                    job.started_at
                        .is_none_or(|started| now.signed_duration_since(started) >= timeout)
                })
                .map(|job| job.id)
                .collect();

            for id in &stuck {
                let error = "job was still running at startup; assumed interrupted".to_string();
                let job = apply(
                    state,
                    *id,
                    Transition::Retry {
                        error,
                        delay: Duration::ZERO,
                    },
                    now,
                )?;
                warn!(
                    job_id = %job.id,
                    target = %job.target,
                    status = %job.status,
                    retry_count = job.retry_count,
                    "recovered stuck job"
                );
            }
            Ok(stuck.len())
        })
        .await
    }

    /// Drop completed jobs beyond the `keep_recent` most recent ones.
    pub async fn prune_completed(&self, keep_recent: usize) -> Result<usize, StoreError> {
        self.mutate(|state, _| {
            let mut completed: Vec<&Job> = state
                .jobs
                .iter()
                .filter(|j| j.status == JobStatus::Completed)
                .collect();
            completed.sort_by(|a, b| recent_first(a, b));
            let doomed: Vec<JobId> = completed.iter().skip(keep_recent).map(|j| j.id).collect();

            state.jobs.retain(|j| !doomed.contains(&j.id));
            if !doomed.is_empty() {
                info!(removed = doomed.len(), kept = keep_recent, "pruned completed jobs");
            }
            Ok(doomed.len())
        })
        .await
    }

    /// Drop every failed job.
    pub async fn prune_failed(&self) -> Result<usize, StoreError> {
        self.mutate(|state, _| {
            let before = state.jobs.len();
            state.jobs.retain(|j| j.status != JobStatus::Failed);
            let removed = before - state.jobs.len();
            if removed > 0 {
                info!(removed, "pruned failed jobs");
            }
            Ok(removed)
        })
        .await
    }

    pub async fn stats(&self) -> QueueStats {
        QueueStats::from_state(&*self.state.lock().await)
    }

    /// A copy of the whole persisted document.
    pub async fn snapshot(&self) -> JobQueueState {
        self.state.lock().await.clone()
    }

    /// When the earliest retrying job becomes eligible, if any are waiting.
    pub async fn earliest_retry_at(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        state
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Retrying)
            .map(|j| j.next_retry_at.unwrap_or(DateTime::<Utc>::MIN_UTC))
            .min()
    }

    pub async fn has_waiting_retries(&self) -> bool {
        self.earliest_retry_at().await.is_some()
    }
}

/// Apply a transition inside a locked state, keeping counters in step.
fn apply(
    state: &mut JobQueueState,
    id: JobId,
    transition: Transition,
    now: DateTime<Utc>,
) -> Result<Job, StoreError> {
    let job = state.get_mut(id).ok_or(StoreError::NotFound(id))?;
    job.apply(transition, now)
        .map_err(|e| StoreError::invalid(id, e))?;
    let job = job.clone();

    match job.status {
        JobStatus::Completed => state.total_completed += 1,
        JobStatus::Failed => state.total_failed += 1,
        _ => {}
    }
    Ok(job)
}
