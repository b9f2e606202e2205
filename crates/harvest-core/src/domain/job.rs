//! Job record and its transitions.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::job_type::JobType;
use super::outcome::JobResult;
use super::progress::{JobProgress, ProgressUpdate};
use super::status::JobStatus;

/// One unit of work against one target.
///
/// Fields are public for reading. Mutation goes through [`Job::apply`] so
/// every status change is checked against the state machine and stamps the
/// right timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    #[serde(rename = "type")]
    pub job_type: JobType,

    /// Subject of the work (e.g. a property address). Deduplication key.
    pub target: String,

    pub status: JobStatus,

    /// Higher runs first among pending jobs.
    #[serde(default)]
    pub priority: i32,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_retry_at: Option<DateTime<Utc>>,

    /// When a retrying job becomes eligible again.
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub progress: JobProgress,

    #[serde(default)]
    pub result: Option<JobResult>,

    /// Last error message.
    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default)]
    pub max_retries: u32,

    /// Caller-supplied data, opaque to the engine.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// One edge of the job state machine, with the data it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Pending/Retrying -> Running.
    Start,

    /// Running -> Completed.
    Complete(JobResult),

    /// Running -> Retrying. Consumes one retry; eligible again after `delay`.
    Retry { error: String, delay: Duration },

    /// Running -> Failed.
    Fail {
        error: String,
        result: Option<JobResult>,
    },

    /// Running -> Cancelled.
    Cancel,
}

impl Transition {
    pub fn target_status(&self) -> JobStatus {
        match self {
            Transition::Start => JobStatus::Running,
            Transition::Complete(_) => JobStatus::Completed,
            Transition::Retry { .. } => JobStatus::Retrying,
            Transition::Fail { .. } => JobStatus::Failed,
            Transition::Cancel => JobStatus::Cancelled,
        }
    }
}

/// A transition that is not an edge of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl Job {
    pub fn new(
        target: impl Into<String>,
        job_type: JobType,
        priority: i32,
        max_retries: u32,
        metadata: BTreeMap<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::generate(),
            job_type,
            target: target.into(),
            status: JobStatus::Pending,
            priority,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_retry_at: None,
            next_retry_at: None,
            progress: JobProgress::default(),
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            metadata,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Is this job a retry whose backoff has elapsed?
    pub fn retry_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Retrying && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Apply one state-machine edge.
    ///
    /// A `Retry` with no retries left is turned into a `Fail`, so
    /// `retry_count` never exceeds `max_retries`.
    pub fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        let transition = match transition {
            Transition::Retry { error, .. } if !self.retries_remaining() => Transition::Fail {
                error,
                result: None,
            },
            other => other,
        };

        let to = transition.target_status();
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }

        match transition {
            Transition::Start => {
                self.started_at = Some(now);
                self.next_retry_at = None;
                self.progress = JobProgress::default();
            }
            Transition::Complete(result) => {
                self.progress.finish(now);
                self.result = Some(result);
                self.error = None;
                self.completed_at = Some(now);
            }
            Transition::Retry { error, delay } => {
                self.retry_count += 1;
                self.last_retry_at = Some(now);
                self.next_retry_at = Some(retry_deadline(now, delay));
                self.error = Some(error);
            }
            Transition::Fail { error, result } => {
                self.error = Some(error);
                self.result = result;
                self.next_retry_at = None;
                self.completed_at = Some(now);
            }
            Transition::Cancel => {
                self.error = Some("cancelled".to_string());
                self.completed_at = Some(now);
            }
        }

        self.status = to;
        Ok(())
    }

    /// Merge a progress report. Only meaningful while running.
    pub fn update_progress(&mut self, update: &ProgressUpdate, now: DateTime<Utc>) {
        self.progress.apply(update, now);
    }

    /// Wall-clock time between start and completion.
    pub fn elapsed_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds() as f64 / 1000.0)
    }
}

fn retry_deadline(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
