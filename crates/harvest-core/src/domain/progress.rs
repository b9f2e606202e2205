//! Progress model: how far along a running job is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mutable progress substructure of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Completion fraction, always within [0.0, 1.0].
    #[serde(default)]
    pub percent: f64,

    /// Human-readable description of the current step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,

    #[serde(default)]
    pub items_completed: u64,

    #[serde(default)]
    pub items_total: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobProgress {
    /// Merge an update into this progress record.
    ///
    /// Only the fields present in `update` change. When no explicit percent is
    /// given but item counts are, the fraction is derived from them.
    pub fn apply(&mut self, update: &ProgressUpdate, now: DateTime<Utc>) {
        if let Some(completed) = update.items_completed {
            self.items_completed = completed;
        }
        if let Some(total) = update.items_total {
            self.items_total = total;
        }
        if let Some(step) = &update.current_step {
            self.current_step = Some(step.clone());
        }

        match update.percent {
            Some(percent) => self.percent = clamp_fraction(percent),
            None if update.items_completed.is_some() && self.items_total > 0 => {
                self.percent =
                    clamp_fraction(self.items_completed as f64 / self.items_total as f64);
            }
            None => {}
        }

        self.updated_at = Some(now);
    }

    /// Force the record to "done".
    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.percent = 1.0;
        if self.items_total > 0 {
            self.items_completed = self.items_total;
        }
        self.updated_at = Some(now);
    }
}

/// Clamp to [0, 1]; NaN counts as no progress.
pub fn clamp_fraction(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A partial progress report sent by a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub percent: Option<f64>,
    pub current_step: Option<String>,
    pub items_completed: Option<u64>,
    pub items_total: Option<u64>,
}

impl ProgressUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn percent(mut self, percent: f64) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }

    pub fn items(mut self, completed: u64, total: u64) -> Self {
        self.items_completed = Some(completed);
        self.items_total = Some(total);
        self
    }

    pub fn items_completed(mut self, completed: u64) -> Self {
        self.items_completed = Some(completed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::below(-0.5, 0.0)]
    #[case::inside(0.25, 0.25)]
    #[case::above(3.0, 1.0)]
    #[case::nan(f64::NAN, 0.0)]
    fn percent_is_clamped(#[case] input: f64, #[case] expected: f64) {
        let mut progress = JobProgress::default();
        progress.apply(&ProgressUpdate::new().percent(input), Utc::now());
        assert_eq!(progress.percent, expected);
    }

    #[test]
    fn percent_derived_from_items_when_absent() {
        let mut progress = JobProgress::default();
        progress.apply(&ProgressUpdate::new().items(1, 4), Utc::now());
        assert_eq!(progress.percent, 0.25);

        progress.apply(&ProgressUpdate::new().items_completed(3), Utc::now());
        assert_eq!(progress.items_total, 4);
        assert_eq!(progress.percent, 0.75);
    }

    #[test]
    fn explicit_percent_wins_over_items() {
        let mut progress = JobProgress::default();
        progress.apply(&ProgressUpdate::new().items(1, 4).percent(0.9), Utc::now());
        assert_eq!(progress.percent, 0.9);
    }

    #[test]
    fn step_only_update_keeps_other_fields() {
        let mut progress = JobProgress::default();
        progress.apply(&ProgressUpdate::new().items(2, 4), Utc::now());
        progress.apply(&ProgressUpdate::new().step("parsing"), Utc::now());

        assert_eq!(progress.current_step.as_deref(), Some("parsing"));
        assert_eq!(progress.items_completed, 2);
        assert_eq!(progress.percent, 0.5);
        assert!(progress.updated_at.is_some());
    }

    #[test]
    fn finish_sets_full_completion() {
        let mut progress = JobProgress::default();
        progress.apply(&ProgressUpdate::new().items(1, 5), Utc::now());
        progress.finish(Utc::now());
        assert_eq!(progress.percent, 1.0);
        assert_eq!(progress.items_completed, 5);
    }
}
