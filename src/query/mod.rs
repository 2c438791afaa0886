pub mod rest;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use rest::BigQueryRest;

/// Process-wide pause applied per collected row, in milliseconds. Many
/// workers run the same query in parallel; pacing row collection keeps the
/// fleet under the aggregate read quota.
static ROW_DELAY_MS: AtomicU64 = AtomicU64::new(0);

pub fn set_row_delay(delay: Duration) {
    ROW_DELAY_MS.store(delay.as_millis() as u64, Ordering::Relaxed);
}

pub fn row_delay() -> Duration {
    Duration::from_millis(ROW_DELAY_MS.load(Ordering::Relaxed))
}

/// A named query parameter, e.g. `@date`.
#[derive(Debug, Clone)]
pub struct QueryParam {
    pub name: String,
    pub value: String,
}

impl QueryParam {
    pub fn new(name: &str, value: &str) -> QueryParam {
        QueryParam {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Types supporting a parameterized query returning JSON object rows.
#[async_trait]
pub trait Querier: Send + Sync {
    async fn rows(&self, query: &str, params: &[QueryParam]) -> Result<Vec<Value>>;
}

/// Run the query and collect every row into the caller's row type,
/// pausing `row_delay` per row.
pub async fn run<Row: DeserializeOwned>(
    querier: &dyn Querier,
    query: &str,
    params: &[QueryParam],
) -> Result<Vec<Row>> {
    let start = std::time::Instant::now();
    let raw = querier.rows(query, params).await?;
    let total = raw.len();
    let delay = row_delay();
    let mut results = Vec::with_capacity(total);
    for row in raw {
        results.push(serde_json::from_value(row).context("decoding query result row")?);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    tracing::info!("collected {} query rows in {:?}", total, start.elapsed());
    Ok(results)
}

// ===========================================================================
// Tests
// ===========================================================================
