use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;

use super::{DateProcessor, Processor};
use crate::archive::{copy_header, Target};
use crate::errors::RepackerError;
use crate::jobs::JobClient;
use crate::query::{self, Querier, QueryParam};

/// Overall deadline for running the date query, including retries.
const QUERY_TIMEOUT: Duration = Duration::from_secs(3600);
/// Deadline for opportunistic job-server updates.
const UPDATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Manager runs the Processor against every result returned by the date
/// query: one archive per row, one file at a time.
pub struct Manager<P: Processor> {
    /// Job client used to refresh the lease while a date is in progress.
    /// None disables lease updates (e.g. single-date runs).
    pub jobs: Option<JobClient>,
    pub processor: P,
    pub querier: Arc<dyn Querier>,
    /// The query text; the date is bound as the @date named parameter.
    pub query: String,
    /// Maximum query attempts before the date is abandoned.
    pub query_retries: usize,
    /// Upper bound, in seconds, of the random pause between query attempts.
    pub max_delay_secs: u64,
}

impl<P: Processor> Manager<P> {
    pub fn new(
        jobs: Option<JobClient>,
        processor: P,
        querier: Arc<dyn Querier>,
        query: String,
    ) -> Manager<P> {
        Manager {
            jobs,
            processor,
            querier,
            query,
            query_retries: 2,
            max_delay_secs: 60,
        }
    }

    /// Process all archives found on the given date.
    pub async fn process_date(&mut self, date: &str) -> Result<()> {
        // Initialize the processor with the current date.
        self.processor.init(date).await?;

        // Collect all results up front, then process in a second loop.
        // Processing rows while the result iterator is open keeps the query
        // running for hours and makes transient 503s fatal.
        let results = self.run_query(date).await?;

        // Processing all results can take several hours.
        tracing::info!("{} operating on archives: {}", date, results.len());
        for (i, row) in results.iter().enumerate() {
            let start = std::time::Instant::now();
            if let Err(err) = self.process_row(date, row).await {
                tracing::error!("row {} processing failed: {:#}", i, err);
                return Err(err);
            }
            tracing::debug!("row {} completed in {:?}", i, start.elapsed());
        }
        Ok(())
    }

    /// Repack the archive identified by a single query result row.
    pub async fn process_row(&mut self, date: &str, row: &P::Row) -> Result<()> {
        // Tell the job server this date is still in progress. Failure is
        // not fatal: the lease timeout will reclaim the date if the worker
        // is actually stuck.
        if let Some(jobs) = &self.jobs {
            match tokio::time::timeout(UPDATE_TIMEOUT, jobs.update(date)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!("failed to update job {}: {}", date, err),
                Err(_) => tracing::warn!("job update for {} timed out", date),
            }
        }

        // Create the source and output archives, held in memory.
        let mut src = self.processor.source(row).await?;
        let mut out = Target::new();
        let mut corrupt = 0usize;

        while let Some((header, data)) = src.next_file() {
            let data = match self.processor.file(&header, data) {
                Ok(data) => data,
                Err(RepackerError::Corrupt) => {
                    // Corrupt files are dropped from the output archive.
                    corrupt += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let mut h = copy_header(&header);
            h.set_size(data.len() as u64);
            h.set_cksum();
            out.add_file(Some(&h), &data)?;
        }

        // Verify that the input and output file counts match. A mismatch
        // means the processor dropped files without signalling corruption.
        if src.count - corrupt != out.count {
            tracing::error!(
                "counts do not match: corrupt:{}, in:{}, out:{}, {}",
                corrupt,
                src.count,
                out.count,
                src.path
            );
            return Err(RepackerError::CountMismatch.into());
        }

        // Every source file was processed and added back. Conclude the
        // archive, e.g. by uploading it to the output bucket.
        self.processor.finish(out).await
    }

    /// Run the configured query for the date, collecting all results.
    /// The query is attempted at most `query_retries` times under a single
    /// one-hour deadline, sleeping a uniformly-random interval between
    /// failed attempts.
    async fn run_query(&self, date: &str) -> Result<Vec<P::Row>> {
        let params = [QueryParam::new("date", date)];
        tokio::time::timeout(QUERY_TIMEOUT, async {
            let mut last_err = None;
            for attempt in 0..self.query_retries.max(1) {
                match query::run::<P::Row>(self.querier.as_ref(), &self.query, &params).await {
                    Ok(results) => return Ok(results),
                    Err(err) => {
                        tracing::warn!("failed to run query (attempt {}): {:#}", attempt, err);
                        last_err = Some(err);
                        if self.max_delay_secs > 0 {
                            let secs = rand::thread_rng().gen_range(0..self.max_delay_secs);
                            tokio::time::sleep(Duration::from_secs(secs)).await;
                        }
                    }
                }
            }
            Err(last_err.expect("at least one query attempt"))
                .context("query failed too many times")
        })
        .await
        .map_err(|_| anyhow::anyhow!("query for {} exceeded deadline", date))?
    }
}

#[async_trait]
impl<P: Processor + Sync> DateProcessor for Manager<P> {
    async fn process_date(&mut self, date: &str) -> Result<()> {
        Manager::process_date(self, date).await
    }
}
