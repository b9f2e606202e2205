use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvest_core::{
    Executor, FileMirrorSink, Handler, HandlerError, Job, JobResult, JobStore, NewJob, ProgressReporter,
    ProgressSink, RetryPolicy, TracingSink,
};

const DEFAULT_STATE_FILE: &str = "harvest-state.json";
const JOB_TYPE: &str = "property.extract";

const ADDRESSES: &[&str] = &[
    "12 Oak Ave, Springfield",
    "400 Harbor Rd, Bayview",
    "7 Mill Lane, Fairhaven",
    "1550 Ridge Crest Dr, Aurora",
    "88 Station St, Millbrook",
];

const STEPS: &[&str] = &[
    "lookup parcel",
    "fetch assessor record",
    "fetch permit history",
    "normalize",
];

/// Simulated extraction: walks a few steps, failing transiently now and then.
struct PropertyExtractor {
    failure_rate: f64,
}

#[async_trait]
impl Handler for PropertyExtractor {
    async fn handle(&self, job: Job, progress: ProgressReporter) -> Result<JobResult, HandlerError> {
        let total = STEPS.len() as u64;
        for (i, step) in STEPS.iter().enumerate() {
            progress.step(*step).await;

            let pause = rand::thread_rng().gen_range(40..160);
            sleep(Duration::from_millis(pause)).await;

            if rand::random::<f64>() < self.failure_rate {
                return Err(HandlerError::failed(format!(
                    "upstream timed out during '{step}' for {}",
                    job.target
                )));
            }
            progress.items(i as u64 + 1, total).await;
        }

        Ok(JobResult::success()
            .with_items(total, 0)
            .with_metadata("source", serde_json::json!("simulated")))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "harvest_core=info,harvest_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state_file = std::env::var_os("HARVEST_STATE_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));

    // (A) store + work
    let store = Arc::new(JobStore::open(&state_file).await?);
    let template = NewJob::new("", JOB_TYPE).max_retries(3);
    let queued = store.enqueue_batch(ADDRESSES.iter().copied(), &template).await;
    for (address, result) in ADDRESSES.iter().zip(queued) {
        match result {
            Ok(job) => info!(job_id = %job.id, target = %address, status = %job.status, "queued"),
            Err(e) => warn!(target = %address, error = %e, "could not queue"),
        }
    }

    // (B) executor
    let executor = Executor::builder(store.clone())
        .max_concurrent(2)
        .retry_policy(RetryPolicy {
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter_fraction: 0.5,
        })
        .handler(JOB_TYPE, PropertyExtractor { failure_rate: 0.15 })
        .build();

    let sink: Arc<dyn ProgressSink> = match std::env::var_os("HARVEST_MIRROR_FILE") {
        Some(path) => Arc::new(FileMirrorSink::open(PathBuf::from(path)).await?),
        None => Arc::new(TracingSink),
    };

    // (C) run to completion
    executor.start(Some(sink)).await?;
    executor.wait().await;

    let stats = store.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    info!(state_file = %state_file.display(), "done");
    Ok(())
}
