pub mod routes;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use tokio::sync::Mutex;
use tower_http::timeout::TimeoutLayer;

use crate::models::JobsState;

/// Shared state for the job server. A single lock serializes every handler
/// and the periodic save/reclaim task.
pub struct AppState {
    pub jobs: Mutex<JobsState>,
    /// Where the job state is periodically written.
    pub state_file: PathBuf,
    /// Maximum time a leased job may go without updates before it is
    /// returned to the pending queue.
    pub timeout: chrono::Duration,
}

impl AppState {
    pub fn new(state_file: PathBuf, timeout: Duration) -> AppState {
        AppState {
            jobs: Mutex::new(JobsState::default()),
            state_file,
            timeout: chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::hours(2)),
        }
    }

    /// Load previously saved state, then run the lease-timeout sweep once.
    /// A missing state file is not an error, and a corrupt one is tolerated:
    /// the server starts empty.
    pub async fn load(&self) -> Result<()> {
        if !self.state_file.exists() {
            return Ok(());
        }
        let content = tokio::fs::read_to_string(&self.state_file)
            .await
            .with_context(|| format!("reading {}", self.state_file.display()))?;
        let mut jobs = self.jobs.lock().await;
        match serde_json::from_str::<JobsState>(&content) {
            Ok(state) => *jobs = state,
            Err(err) => {
                tracing::warn!("failed to unmarshal jobs, file may be corrupt: {}", err);
            }
        }
        let reclaimed = jobs.reclaim_expired(Utc::now(), self.timeout);
        if !reclaimed.is_empty() {
            tracing::info!("reclaimed {} stale leases on startup", reclaimed.len());
        }
        Ok(())
    }

    /// One save-task tick: reclaim expired leases, then write the full state
    /// to disk as pretty JSON via a temporary file and rename.
    pub async fn tick(&self) {
        let mut jobs = self.jobs.lock().await;
        for date in jobs.reclaim_expired(Utc::now(), self.timeout) {
            tracing::info!("lease timed out, returning {} to pending", date);
        }
        tracing::debug!(
            "jobs: {} pending, {} leased, {} completed",
            jobs.pending.len(),
            jobs.leased.len(),
            jobs.completed.len()
        );
        if let Err(err) = self.persist(&jobs).await {
            tracing::error!("failed to write {}: {}", self.state_file.display(), err);
        }
    }

    async fn persist(&self, jobs: &JobsState) -> Result<()> {
        let json = serde_json::to_string_pretty(jobs).context("serializing jobs")?;
        let tmp = self.state_file.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .context("writing temporary state file")?;
        tokio::fs::rename(&tmp, &self.state_file)
            .await
            .context("renaming temporary state file")?;
        Ok(())
    }
}

/// Periodically reclaim stale leases and save state until the task is
/// dropped. The default period is 5 seconds.
pub async fn run_saver(state: Arc<AppState>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first interval tick fires immediately; skip it.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        state.tick().await;
    }
}

/// Create the job-server router. Connections are bounded by a one-minute
/// request timeout.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/init", get(routes::init))
        .route("/v1/lease", get(routes::lease))
        .route("/v1/update", get(routes::update))
        .route("/v1/complete", get(routes::complete))
        .route("/health", get(routes::health))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
}
