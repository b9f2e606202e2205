//! Persisted queue document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Job, JobId, JobStatus};

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// The full persisted collection: jobs in submission order plus cumulative
/// counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobQueueState {
    /// Files written before versioning existed have no tag and load as 0.
    #[serde(default)]
    pub version: u32,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub total_submitted: u64,

    #[serde(default)]
    pub total_completed: u64,

    #[serde(default)]
    pub total_failed: u64,

    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl JobQueueState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            created_at: now,
            updated_at: now,
            total_submitted: 0,
            total_completed: 0,
            total_failed: 0,
            jobs: Vec::new(),
        }
    }

    /// Bring a freshly loaded document up to the current schema.
    pub fn migrate(&mut self) {
        if self.version > SCHEMA_VERSION {
            warn!(
                version = self.version,
                supported = SCHEMA_VERSION,
                "queue state written by a newer version; loading best-effort"
            );
            return;
        }

        if self.version == 0 {
            // v0 did not keep counters; rebuild them from the jobs we have.
            self.total_submitted = self.total_submitted.max(self.jobs.len() as u64);
            self.total_completed = self.total_completed.max(self.count(JobStatus::Completed) as u64);
            self.total_failed = self.total_failed.max(self.count(JobStatus::Failed) as u64);
        }

        self.version = SCHEMA_VERSION;
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    /// The job currently occupying `target`, if any.
    pub fn active_for_target(&self, target: &str) -> Option<&Job> {
        self.jobs
            .iter()
            .find(|job| job.target == target && job.status.is_active())
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|job| job.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobResult, JobType, Transition};
    use std::collections::BTreeMap;

    fn job(target: &str) -> Job {
        Job::new(
            target,
            JobType::new("t"),
            0,
            1,
            BTreeMap::new(),
            Utc::now(),
        )
    }

    #[test]
    fn roundtrip_preserves_jobs_and_counters() {
        let mut state = JobQueueState::new(Utc::now());
        let mut done = job("A");
        done.apply(Transition::Start, Utc::now()).unwrap();
        done.apply(Transition::Complete(JobResult::success()), Utc::now())
            .unwrap();
        state.jobs.push(done);
        state.jobs.push(job("B"));
        state.total_submitted = 2;
        state.total_completed = 1;

        let text = serde_json::to_string_pretty(&state).unwrap();
        let back: JobQueueState = serde_json::from_str(&text).unwrap();

        assert_eq!(back, state);
        assert_eq!(back.jobs[0].status, JobStatus::Completed);
    }

    #[test]
    fn unversioned_document_is_upgraded() {
        let raw = serde_json::json!({
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z",
            "jobs": [{
                "id": ulid::Ulid::new().to_string(),
                "type": "property.extract",
                "target": "1 Elm St",
                "status": "COMPLETED",
                "created_at": "2025-01-01T00:00:00Z",
                "completed_at": "2025-01-01T00:01:00Z"
            }]
        });

        let mut state: JobQueueState = serde_json::from_value(raw).unwrap();
        assert_eq!(state.version, 0);

        state.migrate();
        assert_eq!(state.version, SCHEMA_VERSION);
        assert_eq!(state.total_submitted, 1);
        assert_eq!(state.total_completed, 1);
        assert_eq!(state.jobs[0].max_retries, 0);
        assert_eq!(state.jobs[0].progress.percent, 0.0);
    }

    #[test]
    fn newer_version_is_left_alone() {
        let mut state = JobQueueState::new(Utc::now());
        state.version = SCHEMA_VERSION + 1;
        state.migrate();
        assert_eq!(state.version, SCHEMA_VERSION + 1);
    }

    #[test]
    fn active_for_target_ignores_terminal_jobs() {
        let mut state = JobQueueState::new(Utc::now());
        let mut old = job("A");
        old.apply(Transition::Start, Utc::now()).unwrap();
        old.apply(Transition::Cancel, Utc::now()).unwrap();
        state.jobs.push(old);
        assert!(state.active_for_target("A").is_none());

        let fresh = job("A");
        let id = fresh.id;
        state.jobs.push(fresh);
        assert_eq!(state.active_for_target("A").map(|j| j.id), Some(id));
    }
}
