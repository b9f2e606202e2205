use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::handler::Handler;
use crate::domain::JobType;

/// Registry of handlers (job_type -> handler).
///
/// Registering a type twice replaces the earlier handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, returning the one it replaced.
    pub fn register(
        &mut self,
        job_type: JobType,
        handler: Arc<dyn Handler>,
    ) -> Option<Arc<dyn Handler>> {
        let previous = self.handlers.insert(job_type.clone(), handler);
        if previous.is_some() {
            warn!(job_type = %job_type, "handler replaced; last registration wins");
        } else {
            debug!(job_type = %job_type, "handler registered");
        }
        previous
    }

    pub fn get(&self, job_type: &JobType) -> Option<Arc<dyn Handler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobResult};
    use crate::error::HandlerError;
    use crate::executor::handler::handler_fn;
    use crate::executor::reporter::ProgressReporter;
    use crate::store::JobStore;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn tagged(tag: &'static str) -> Arc<dyn Handler> {
        Arc::new(handler_fn(move |_job: Job, _p: ProgressReporter| async move {
            Ok::<_, HandlerError>(JobResult::success().with_metadata("tag", tag.into()))
        }))
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut reg = HandlerRegistry::new();
        assert!(reg.register(JobType::new("t"), tagged("first")).is_none());
        assert!(reg.register(JobType::new("t"), tagged("second")).is_some());
        assert_eq!(reg.len(), 1);

        let job = Job::new("A", JobType::new("t"), 0, 0, BTreeMap::new(), Utc::now());
        let reporter = ProgressReporter::detached(job.id, Arc::new(JobStore::in_memory()));
        let result = reg
            .get(&JobType::new("t"))
            .unwrap()
            .handle(job, reporter)
            .await
            .unwrap();
        assert_eq!(result.metadata["tag"], "second");
    }

    #[test]
    fn unknown_type_has_no_handler() {
        let reg = HandlerRegistry::new();
        assert!(reg.is_empty());
        assert!(reg.get(&JobType::new("missing")).is_none());
    }
}
