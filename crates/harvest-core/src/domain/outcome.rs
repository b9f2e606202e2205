//! Handler result format.
//!
//! This module does not assume queues, workers or persistence. It only
//! defines the shape of what a handler hands back and what gets recorded on
//! the job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What a handler produced for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,

    #[serde(default)]
    pub items_processed: u64,

    #[serde(default)]
    pub items_failed: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    #[serde(default)]
    pub duration_seconds: f64,

    /// Free-form data for the caller; never interpreted by the engine.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl JobResult {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![error.into()],
            ..Self::default()
        }
    }

    pub fn with_items(mut self, processed: u64, failed: u64) -> Self {
        self.items_processed = processed;
        self.items_failed = failed;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = seconds;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Error message to record on the job when this result is a failure.
    pub fn error_message(&self) -> String {
        if self.errors.is_empty() {
            "handler reported failure".to_string()
        } else {
            self.errors.join("; ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose() {
        let result = JobResult::success()
            .with_items(10, 2)
            .with_duration(1.5)
            .with_metadata("county", serde_json::json!("Travis"));

        assert!(result.success);
        assert_eq!(result.items_processed, 10);
        assert_eq!(result.items_failed, 2);
        assert_eq!(result.duration_seconds, 1.5);
        assert_eq!(result.metadata["county"], "Travis");
    }

    #[test]
    fn error_message_joins_errors() {
        let result = JobResult::failure("timeout").with_error("bad gateway");
        assert_eq!(result.error_message(), "timeout; bad gateway");

        let bare = JobResult::default();
        assert_eq!(bare.error_message(), "handler reported failure");
    }

    #[test]
    fn empty_collections_are_omitted() {
        let json = serde_json::to_value(JobResult::success()).unwrap();
        assert!(json.get("errors").is_none());
        assert!(json.get("metadata").is_none());
        assert_eq!(json["success"], true);
    }
}
