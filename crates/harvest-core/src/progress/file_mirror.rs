//! Mirrors job snapshots into a JSON file.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use super::sink::ProgressSink;
use crate::domain::Job;
use crate::error::StoreError;
use crate::store::persist::write_json_atomic;

/// Keeps a JSON object `{ "<job id>": <job>, ... }` in step with the executor.
///
/// Every event replaces that job's entry in full and rewrites the file
/// atomically, so replaying events is harmless.
pub struct FileMirrorSink {
    path: PathBuf,
    records: Mutex<BTreeMap<String, Job>>,
}

impl FileMirrorSink {
    /// Start with an empty mirror; the file is replaced on the first event.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// Continue an existing mirror file.
    ///
    /// A missing file starts an empty mirror, and so does one that is not
    /// valid JSON (the mirror is rebuilt from later events). Any other read
    /// failure is an error, so an existing mirror is never overwritten blind.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "mirror file unreadable; starting fresh");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read mirror file");
                return Err(StoreError::io(&path, e));
            }
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn mirror(&self, job: &Job) {
        let mut records = self.records.lock().await;
        records.insert(job.id.as_ulid().to_string(), job.clone());
        if let Err(e) = write_json_atomic(&self.path, &*records).await {
            warn!(job_id = %job.id, error = %e, "failed to mirror job");
        }
    }
}

#[async_trait]
impl ProgressSink for FileMirrorSink {
    async fn on_progress(&self, job: &Job) {
        self.mirror(job).await;
    }

    async fn on_complete(&self, job: &Job) {
        self.mirror(job).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobResult, JobStatus, JobType, Transition};
    use chrono::Utc;
    use tempfile::TempDir;

    fn read(path: &Path) -> BTreeMap<String, Job> {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn later_snapshot_overwrites_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.json");
        let sink = FileMirrorSink::new(&path);

        let mut job = Job::new("A", JobType::new("t"), 0, 0, BTreeMap::new(), Utc::now());
        job.apply(Transition::Start, Utc::now()).unwrap();
        sink.on_progress(&job).await;
        job.apply(Transition::Complete(JobResult::success()), Utc::now())
            .unwrap();
        sink.on_complete(&job).await;
        sink.on_complete(&job).await;

        let records = read(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[&job.id.as_ulid().to_string()].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn open_keeps_existing_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.json");
        let a = Job::new("A", JobType::new("t"), 0, 0, BTreeMap::new(), Utc::now());
        FileMirrorSink::new(&path).on_progress(&a).await;

        let b = Job::new("B", JobType::new("t"), 0, 0, BTreeMap::new(), Utc::now());
        FileMirrorSink::open(&path)
            .await
            .unwrap()
            .on_progress(&b)
            .await;

        assert_eq!(read(&path).len(), 2);
    }

    #[tokio::test]
    async fn open_starts_empty_for_missing_or_garbled_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.json");
        let sink = FileMirrorSink::open(&path).await.unwrap();
        assert!(sink.records.lock().await.is_empty());

        std::fs::write(&path, "{ not json").unwrap();
        let sink = FileMirrorSink::open(&path).await.unwrap();
        assert!(sink.records.lock().await.is_empty());
    }

    #[tokio::test]
    async fn open_refuses_a_mirror_it_cannot_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mirror.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();

        let err = FileMirrorSink::open(&path).await.err().unwrap();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(path.join("keep").exists());
    }
}
