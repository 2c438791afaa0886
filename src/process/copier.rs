use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::DateProcessor;
use crate::jobs::JobClient;

/// Types that support bulk renaming of date-sharded objects.
#[async_trait]
pub trait Renamer: Send + Sync {
    /// Enumerate object URLs for the given date.
    async fn list(&self, date: &str) -> Result<Vec<String>>;
    /// Copy the named object to its renamed location, returning the new URL.
    async fn rename(&self, url: &str) -> Result<String>;
}

/// Copier manages bulk rename operations for one date at a time.
pub struct Copier {
    /// Job client used to refresh the lease during long rename runs.
    /// None disables lease updates (e.g. single-date runs).
    pub jobs: Option<JobClient>,
    pub renamer: Arc<dyn Renamer>,
}

impl Copier {
    pub fn new(jobs: Option<JobClient>, renamer: Arc<dyn Renamer>) -> Copier {
        Copier { jobs, renamer }
    }

    /// Apply the renamer to every object for the given date.
    pub async fn process_date(&self, date: &str) -> Result<()> {
        let urls = self
            .renamer
            .list(date)
            .await
            .with_context(|| format!("failed to list {}", date))?;
        for (i, url) in urls.iter().enumerate() {
            if i % 1000 == 0 {
                tracing::info!("renamed {} objects for {}", i, date);
                if let Some(jobs) = &self.jobs {
                    if let Err(err) = jobs.update(date).await {
                        tracing::warn!("failed to update job {}: {}", date, err);
                    }
                }
            }
            self.renamer
                .rename(url)
                .await
                .with_context(|| format!("failed rename of {:?}", url))?;
        }
        tracing::info!("renamed {} objects for {}", urls.len(), date);
        Ok(())
    }
}

#[async_trait]
impl DateProcessor for Copier {
    async fn process_date(&mut self, date: &str) -> Result<()> {
        Copier::process_date(self, date).await
    }
}

// ===========================================================================
// Tests
// ===========================================================================
