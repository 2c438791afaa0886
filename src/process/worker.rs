use std::time::Duration;

use anyhow::{Context, Result};

use super::DateProcessor;
use crate::errors::RepackerError;
use crate::jobs::JobClient;

/// How long the worker idles when the job server signals Wait, and before
/// exiting on Empty.
pub const IDLE_WAIT: Duration = Duration::from_secs(60);

/// Lease dates from the job server and process them until the work set is
/// drained.
///
/// On `Wait` the worker sleeps and retries; on `Empty` it waits once more
/// and exits cleanly so the orchestration layer can decide whether to
/// restart it. Processing failures are fatal: the worker exits and the
/// lease timeout makes the date available to another worker.
pub async fn run_worker(
    jobs: &JobClient,
    processor: &mut dyn DateProcessor,
    wait: Duration,
) -> Result<()> {
    loop {
        let date = match jobs.lease().await {
            Ok(date) => date,
            Err(RepackerError::Empty) => {
                tracing::info!("work queue empty; exiting");
                tokio::time::sleep(wait).await;
                return Ok(());
            }
            Err(RepackerError::Wait) => {
                tracing::info!("waiting for job; sleeping {:?}", wait);
                tokio::time::sleep(wait).await;
                continue;
            }
            Err(err) => return Err(err).context("failed to request job lease"),
        };

        let start = std::time::Instant::now();
        tracing::info!("processing: {}", date);
        processor
            .process_date(&date)
            .await
            .with_context(|| format!("failed to process date {}", date))?;

        jobs.complete(&date)
            .await
            .with_context(|| format!("failed to complete {} with job service", date))?;
        tracing::info!("completed date: {} in {:?}", date, start.elapsed());
    }
}
