use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of work a job represents. Selects the handler that processes it.
///
/// Kinds are defined by the embedding application (for example
/// `property.extract`), so this is an open string rather than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for JobType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JobType {
    fn from(s: String) -> Self {
        Self(s)
    }
}
