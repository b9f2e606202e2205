//! Crash-safe file persistence.
//!
//! Writes go to a sibling temp file which is flushed and then renamed over the
//! real file, so readers only ever see the old or the new document.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::state::JobQueueState;
use crate::error::StoreError;

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }

    let tmp_path = sibling(path, ".tmp");
    if let Err(e) = replace_with(&tmp_path, path, &bytes).await {
        // a failed cleanup is not reported
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    debug!(path = %path.display(), bytes = bytes.len(), "state written");
    Ok(())
}

async fn replace_with(tmp_path: &Path, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = tokio::fs::File::create(tmp_path)
        .await
        .map_err(|e| StoreError::io(tmp_path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| StoreError::io(tmp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| StoreError::io(tmp_path, e))?;
    drop(file);

    tokio::fs::rename(tmp_path, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

/// Load the queue state at `path`.
///
/// A missing file yields an empty state. An unreadable document is renamed
/// aside (`<name>.corrupt-<timestamp>`) and an empty state is returned; only
/// I/O failures are errors.
pub async fn load_state(path: &Path) -> Result<JobQueueState, StoreError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no state file yet; starting empty");
            return Ok(JobQueueState::new(Utc::now()));
        }
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            // not UTF-8
            quarantine(path, &e.to_string()).await?;
            return Ok(JobQueueState::new(Utc::now()));
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };

    match serde_json::from_str::<JobQueueState>(&text) {
        Ok(mut state) => {
            state.migrate();
            Ok(state)
        }
        Err(e) => {
            quarantine(path, &e.to_string()).await?;
            Ok(JobQueueState::new(Utc::now()))
        }
    }
}

async fn quarantine(path: &Path, reason: &str) -> Result<PathBuf, StoreError> {
    let suffix = format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f"));
    let backup = sibling(path, &suffix);
    tokio::fs::rename(path, &backup)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    warn!(
        path = %path.display(),
        backup = %backup.display(),
        reason,
        "queue state unreadable; moved aside and starting empty"
    );
    Ok(backup)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("state"));
    name.push(suffix);
    path.with_file_name(name)
}
