use serde::{Deserialize, Serialize};

use super::ordering::recent_first;
use super::state::JobQueueState;
use crate::domain::{Job, JobStatus};

/// How many recent completions feed the duration average.
pub const DURATION_SAMPLE: usize = 20;

/// Point-in-time summary of the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,

    pub total_submitted: u64,
    pub total_completed: u64,
    pub total_failed: u64,

    pub average_duration_secs: Option<f64>,

    /// Serial estimate for the outstanding work.
    pub estimated_remaining_secs: Option<f64>,
}

impl QueueStats {
    pub fn from_state(state: &JobQueueState) -> Self {
        let mut stats = QueueStats {
            total: state.jobs.len(),
            total_submitted: state.total_submitted,
            total_completed: state.total_completed,
            total_failed: state.total_failed,
            ..QueueStats::default()
        };

        for job in &state.jobs {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Retrying => stats.retrying += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }

        stats.average_duration_secs = average_duration(&state.jobs);
        stats.estimated_remaining_secs = stats
            .average_duration_secs
            .map(|avg| avg * stats.outstanding() as f64);
        stats
    }

    /// Jobs that still need work.
    pub fn outstanding(&self) -> usize {
        self.pending + self.retrying + self.running
    }
}

fn average_duration(jobs: &[Job]) -> Option<f64> {
    let mut completed: Vec<&Job> = jobs
        .iter()
        .filter(|job| job.status == JobStatus::Completed)
        .collect();
    completed.sort_by(|a, b| recent_first(a, b));

    let samples: Vec<f64> = completed
        .into_iter()
        .filter_map(job_duration)
        .take(DURATION_SAMPLE)
        .collect();

    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

fn job_duration(job: &Job) -> Option<f64> {
    job.result
        .as_ref()
        .map(|r| r.duration_seconds)
        .filter(|secs| *secs > 0.0)
        .or_else(|| job.elapsed_seconds())
}
