//! Ordering rules for picking the next job.
//!
//! - Pending: priority descending, then creation time ascending.
//! - Retrying: oldest `last_retry_at` first, then the pending rule.
//! - A due retry always beats any pending job.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::domain::{Job, JobStatus};

pub fn pending_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
}

pub fn retry_order(a: &Job, b: &Job) -> Ordering {
    a.last_retry_at
        .cmp(&b.last_retry_at)
        .then_with(|| pending_order(a, b))
}

/// Most recently finished first.
pub fn recent_first(a: &Job, b: &Job) -> Ordering {
    b.completed_at
        .cmp(&a.completed_at)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// The single best candidate to run at `now`, if any.
pub fn select_next<'a>(jobs: impl IntoIterator<Item = &'a Job>, now: DateTime<Utc>) -> Option<&'a Job> {
    let mut best_retry: Option<&Job> = None;
    let mut best_pending: Option<&Job> = None;

    for job in jobs {
        match job.status {
            JobStatus::Retrying if job.retry_due(now) => {
                if best_retry.is_none_or(|best| retry_order(job, best) == Ordering::Less) {
                    best_retry = Some(job);
                }
            }
            JobStatus::Pending => {
                if best_pending.is_none_or(|best| pending_order(job, best) == Ordering::Less) {
                    best_pending = Some(job);
                }
            }
            _ => {}
        }
    }

    best_retry.or(best_pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobType, Transition};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn job_at(target: &str, priority: i32, created_secs: i64) -> Job {
        let created = DateTime::<Utc>::from_timestamp(1_700_000_000 + created_secs, 0).unwrap();
        Job::new(target, JobType::new("t"), priority, 3, BTreeMap::new(), created)
    }

    fn retrying(mut job: Job, failed_at_secs: i64, delay: Duration) -> Job {
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000 + failed_at_secs, 0).unwrap();
        job.apply(Transition::Start, at).unwrap();
        job.apply(
            Transition::Retry {
                error: "e".into(),
                delay,
            },
            at,
        )
        .unwrap();
        job
    }

    #[test]
    fn higher_priority_then_older_first() {
        let mut jobs = vec![
            job_at("low-old", 0, 0),
            job_at("high-new", 5, 20),
            job_at("high-old", 5, 10),
        ];
        jobs.sort_by(pending_order);
        let order: Vec<_> = jobs.iter().map(|j| j.target.as_str()).collect();
        assert_eq!(order, vec!["high-old", "high-new", "low-old"]);
    }

    #[test]
    fn due_retry_beats_high_priority_pending() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_100, 0).unwrap();
        let jobs = vec![
            job_at("urgent", 100, 0),
            retrying(job_at("retry", 0, 1), 50, Duration::from_secs(10)),
        ];
        assert_eq!(select_next(&jobs, now).map(|j| j.target.as_str()), Some("retry"));
    }

    #[test]
    fn retry_in_backoff_is_skipped() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_055, 0).unwrap();
        let jobs = vec![
            job_at("pending", 0, 0),
            retrying(job_at("retry", 0, 1), 50, Duration::from_secs(10)),
        ];
        assert_eq!(select_next(&jobs, now).map(|j| j.target.as_str()), Some("pending"));
    }

    #[test]
    fn oldest_backoff_first_among_retries() {
        let now = DateTime::<Utc>::from_timestamp(1_700_001_000, 0).unwrap();
        let jobs = vec![
            retrying(job_at("later", 9, 0), 60, Duration::from_secs(1)),
            retrying(job_at("earlier", 0, 1), 30, Duration::from_secs(1)),
        ];
        assert_eq!(select_next(&jobs, now).map(|j| j.target.as_str()), Some("earlier"));
    }

    #[test]
    fn nothing_eligible() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let mut running = job_at("r", 0, 0);
        running.apply(Transition::Start, now).unwrap();
        assert!(select_next(&[running], now).is_none());
    }
}
