use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Datelike;

use super::rewrite_datatype;
use crate::models::parse_date;
use crate::process::Renamer;
use crate::storage::{ObjectClient, StorePath};

/// Individual days should only have 10-20k objects.
const LIST_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Individual archives (under ~50MB) should not take longer than an hour.
const COPY_TIMEOUT: Duration = Duration::from_secs(3600);
const ATTEMPTS: usize = 2;

/// DatatypeRenamer copies date-sharded archives from one datatype name to
/// another, e.g. ndt/annotation/... to ndt/annotation2/... in the output
/// bucket.
pub struct DatatypeRenamer {
    client: Arc<dyn ObjectClient>,
    bucket: String,
    experiment: String,
    from_datatype: String,
    new_datatype: String,
}

impl DatatypeRenamer {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        bucket: &str,
        experiment: &str,
        from_datatype: &str,
        new_datatype: &str,
    ) -> DatatypeRenamer {
        DatatypeRenamer {
            client,
            bucket: bucket.to_string(),
            experiment: experiment.to_string(),
            from_datatype: from_datatype.to_string(),
            new_datatype: new_datatype.to_string(),
        }
    }
}

#[async_trait]
impl Renamer for DatatypeRenamer {
    /// Every object of the original datatype under the given date prefix.
    async fn list(&self, date: &str) -> Result<Vec<String>> {
        let d = parse_date(date)?;
        let prefix = StorePath::parse(&format!(
            "gs://{}/{}/{}/{:04}/{:02}/{:02}",
            self.bucket,
            self.experiment,
            self.from_datatype,
            d.year(),
            d.month(),
            d.day()
        ))?;
        tracing::info!("listing files under: {}", prefix);

        tokio::time::timeout(LIST_TIMEOUT, async {
            let mut last_err = None;
            for _ in 0..ATTEMPTS {
                match self.client.list(&prefix).await {
                    Ok(objects) => {
                        tracing::info!("list found {} files for {}", objects.len(), prefix);
                        return Ok(objects.iter().map(|o| o.to_string()).collect());
                    }
                    Err(err) => {
                        tracing::warn!("retrying; list of {} returned error: {}", prefix, err);
                        last_err = Some(err);
                    }
                }
            }
            Err(last_err.expect("at least one list attempt"))
        })
        .await
        .map_err(|_| anyhow::anyhow!("list of {} timed out", prefix))?
    }

    /// Copy the named archive to a new object, replacing the original
    /// datatype with the new one. The destination is overwritten
    /// unconditionally.
    async fn rename(&self, url: &str) -> Result<String> {
        let src = StorePath::parse_archive(url)?;
        let mut dst = src.dup(&self.bucket);
        dst.set_object(rewrite_datatype(
            dst.object(),
            &self.from_datatype,
            &self.new_datatype,
        ));

        tokio::time::timeout(COPY_TIMEOUT, async {
            let mut last_err = None;
            for _ in 0..ATTEMPTS {
                match self.client.copy(&src, &dst).await {
                    Ok(()) => return Ok(dst.to_string()),
                    Err(err) => {
                        tracing::warn!("failed to copy {}: {}", dst, err);
                        last_err = Some(err);
                    }
                }
            }
            Err(last_err.expect("at least one copy attempt"))
                .with_context(|| format!("copying {} to {}", src, dst))
        })
        .await
        .map_err(|_| anyhow::anyhow!("copy of {} timed out", url))?
    }
}

// ===========================================================================
// Tests
// ===========================================================================
