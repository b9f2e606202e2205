//! Turns an attempt's outcome into the job's next transition.
//!
//! Pure: no store access, no side effects. The executor applies the result.

use crate::domain::{Job, JobResult, Transition};
use crate::error::HandlerError;

use super::retry::RetryPolicy;

/// Decide what happens to `job` after an attempt.
///
/// - success completes the job
/// - a permanent error fails it straight away
/// - any other failure retries while budget remains, with the delay from
///   `policy`; once exhausted the job fails and keeps the last result
pub fn decide(job: &Job, outcome: Result<JobResult, HandlerError>, policy: &RetryPolicy) -> Transition {
    let (error, result) = match outcome {
        Ok(result) if result.success => return Transition::Complete(result),
        Ok(result) => (result.error_message(), Some(result)),
        Err(HandlerError::Permanent(error)) => {
            return Transition::Fail {
                error,
                result: None,
            };
        }
        Err(e) => (e.to_string(), None),
    };

    if job.retries_remaining() {
        Transition::Retry {
            error,
            delay: policy.next_delay(job.retry_count),
        }
    } else {
        Transition::Fail { error, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobType;
    use chrono::Utc;
    use rstest::rstest;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn job(retry_count: u32, max_retries: u32) -> Job {
        let mut job = Job::new("A", JobType::new("t"), 0, max_retries, BTreeMap::new(), Utc::now());
        job.retry_count = retry_count;
        job
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            jitter_fraction: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn success_completes() {
        let t = decide(&job(0, 3), Ok(JobResult::success()), &policy());
        assert!(matches!(t, Transition::Complete(r) if r.success));
    }

    #[rstest]
    #[case::first(0, Duration::from_secs(1))]
    #[case::second(1, Duration::from_secs(2))]
    #[case::third(2, Duration::from_secs(4))]
    fn failure_with_budget_retries(#[case] retry_count: u32, #[case] expected: Duration) {
        let t = decide(&job(retry_count, 5), Err(HandlerError::failed("503")), &policy());
        assert_eq!(
            t,
            Transition::Retry {
                error: "503".into(),
                delay: expected
            }
        );
    }

    #[test]
    fn exhausted_budget_fails_with_result() {
        let result = JobResult::failure("bad page").with_error("timeout");
        let t = decide(&job(2, 2), Ok(result.clone()), &policy());
        assert_eq!(
            t,
            Transition::Fail {
                error: "bad page; timeout".into(),
                result: Some(result)
            }
        );
    }

    #[test]
    fn permanent_error_skips_retries() {
        let t = decide(&job(0, 5), Err(HandlerError::permanent("no such parcel")), &policy());
        assert!(matches!(t, Transition::Fail { error, .. } if error == "no such parcel"));
    }

    #[test]
    fn panic_is_retryable() {
        let t = decide(&job(0, 1), Err(HandlerError::Panicked("oops".into())), &policy());
        assert!(matches!(t, Transition::Retry { error, .. } if error.contains("oops")));
    }
}
