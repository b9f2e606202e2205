//! Job status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job.
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Retrying -> Running (loop while retries remain)
/// - Pending -> Running -> Failed (retries exhausted, permanent error, no handler)
/// - Pending -> Running -> Cancelled
///
/// Stuck-job recovery reuses Running -> Retrying and Running -> Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting to be picked up for the first time.
    Pending,

    /// Currently being executed by a handler.
    Running,

    /// Failed at least once and waiting for its backoff to elapse.
    Retrying,

    /// Handler succeeded.
    Completed,

    /// Failed permanently.
    Failed,

    /// Aborted by an explicit cancel request.
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Retrying,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Is this a terminal status (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Does a job in this status still occupy its target?
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Is `self -> next` an edge of the state machine?
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Retrying, Running)
                | (Running, Completed)
                | (Running, Retrying)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Retrying => "RETRYING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::pick_up(JobStatus::Pending, JobStatus::Running)]
    #[case::retry_again(JobStatus::Retrying, JobStatus::Running)]
    #[case::succeed(JobStatus::Running, JobStatus::Completed)]
    #[case::schedule_retry(JobStatus::Running, JobStatus::Retrying)]
    #[case::give_up(JobStatus::Running, JobStatus::Failed)]
    #[case::cancel(JobStatus::Running, JobStatus::Cancelled)]
    fn valid_edges(#[case] from: JobStatus, #[case] to: JobStatus) {
        assert!(from.can_transition_to(to));
    }

    #[test]
    fn exactly_six_edges_exist() {
        let edges = JobStatus::ALL
            .iter()
            .flat_map(|from| JobStatus::ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .count();
        assert_eq!(edges, 6);
    }

    #[rstest]
    #[case::completed(JobStatus::Completed)]
    #[case::failed(JobStatus::Failed)]
    #[case::cancelled(JobStatus::Cancelled)]
    fn terminal_statuses_have_no_exits(#[case] status: JobStatus) {
        assert!(status.is_terminal());
        assert!(JobStatus::ALL.iter().all(|next| !status.can_transition_to(*next)));
    }

    #[test]
    fn serializes_as_screaming_names() {
        for status in JobStatus::ALL {
            let s = serde_json::to_string(&status).unwrap();
            assert_eq!(s, format!("\"{}\"", status.as_str()));
        }
    }
}
