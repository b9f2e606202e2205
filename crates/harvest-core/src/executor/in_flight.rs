//! Tracking of jobs currently being processed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OwnedSemaphorePermit;
use tokio::task::AbortHandle;

use crate::domain::JobId;

/// Ids of in-flight jobs and the handles to abort their tasks.
///
/// Guarded by a std mutex: every critical section is short and never awaits,
/// and the drop guard has to reach it synchronously.
#[derive(Clone, Default)]
pub(crate) struct InFlight {
    tasks: Arc<Mutex<HashMap<JobId, AbortHandle>>>,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, AbortHandle>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn via `spawn` and record the task under `id`.
    ///
    /// The lock is held across the spawn so the task cannot finish and
    /// deregister before it is registered.
    pub fn register(&self, id: JobId, spawn: impl FnOnce() -> AbortHandle) {
        let mut tasks = self.lock();
        let handle = spawn();
        tasks.insert(id, handle);
    }

    pub fn remove(&self, id: JobId) -> Option<AbortHandle> {
        self.lock().remove(&id)
    }

    pub fn ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Abort every tracked task. Returns their job ids.
    pub fn abort_all(&self) -> Vec<JobId> {
        let drained: Vec<(JobId, AbortHandle)> = self.lock().drain().collect();
        let mut ids: Vec<JobId> = drained
            .into_iter()
            .map(|(id, handle)| {
                handle.abort();
                id
            })
            .collect();
        ids.sort();
        ids
    }
}

/// Held by a job task for its whole life.
///
/// Dropping it (normal return, error, panic or abort) deregisters the job and
/// frees its concurrency slot.
pub(crate) struct InFlightGuard {
    in_flight: InFlight,
    id: JobId,
    _permit: OwnedSemaphorePermit,
}

impl InFlightGuard {
    pub fn new(in_flight: InFlight, id: JobId, permit: OwnedSemaphorePermit) -> Self {
        Self {
            in_flight,
            id,
            _permit: permit,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(self.id);
    }
}
