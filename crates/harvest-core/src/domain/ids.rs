//! Job identifiers.
//!
//! ULIDs sort by creation time, so ordering ids is the same as ordering by
//! submission when two jobs share a timestamp.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Identifier of a Job. Generated once at enqueue time and never changed.
///
/// Persisted as the bare ULID string; `Display` adds a `job-` prefix so ids
/// are easy to spot in logs.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    /// Generate a fresh id from the current time.
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for JobId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ulid::DecodeError;

    /// Accepts both the bare ULID and the `job-` prefixed display form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("job-").unwrap_or(s);
        Ulid::from_string(raw).map(Self)
    }
}
