use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use super::asn::AsnAnnotator;
use super::process::{build_annotator, AnnotationRow};
use crate::archive::{Source, Target};
use crate::errors::RepackerError;
use crate::process::Processor;
use crate::storage::{ObjectClient, StorePath};

const FINISH_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// HopProcessor rewrites the Client.Network annotation of hop annotation
/// files. The query carries no per-file IPs; the hop IP is the third
/// `_`-separated field of the file name, e.g.
/// 20230101T000000Z_ndt-abcde_1.2.3.4.json.
pub struct HopProcessor {
    client: Arc<dyn ObjectClient>,
    out_bucket: String,
    rv4_prefix: String,
    rv6_prefix: String,
    asnames_url: String,
    asn: Option<AsnAnnotator>,
    src_path: Option<StorePath>,
}

impl HopProcessor {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        out_bucket: &str,
        rv4_prefix: &str,
        rv6_prefix: &str,
        asnames_url: &str,
    ) -> HopProcessor {
        HopProcessor {
            client,
            out_bucket: out_bucket.to_string(),
            rv4_prefix: rv4_prefix.to_string(),
            rv6_prefix: rv6_prefix.to_string(),
            asnames_url: asnames_url.to_string(),
            asn: None,
            src_path: None,
        }
    }
}

/// The hop IP embedded in a hop annotation file name, if the name has the
/// expected three-field form.
fn hop_ip(name: &str) -> Option<&str> {
    let stem = name.strip_suffix(".json").unwrap_or(name);
    let fields: Vec<&str> = stem.split('_').collect();
    match fields.as_slice() {
        [_, _, ip] => Some(ip),
        _ => None,
    }
}

#[async_trait]
impl Processor for HopProcessor {
    type Row = AnnotationRow;

    async fn init(&mut self, date: &str) -> Result<()> {
        self.asn = Some(
            build_annotator(
                &self.client,
                date,
                &self.rv4_prefix,
                &self.rv6_prefix,
                &self.asnames_url,
            )
            .await?,
        );
        Ok(())
    }

    async fn source(&mut self, row: &Self::Row) -> Result<Source> {
        tracing::info!("starting {}", row.archive_url);
        let src = Source::from_url(self.client.as_ref(), &row.archive_url)
            .await
            .with_context(|| format!("failed to create new source for {}", row.archive_url))?;
        self.src_path = Some(src.path.clone());
        Ok(src)
    }

    fn file(&mut self, header: &tar::Header, data: Vec<u8>) -> Result<Vec<u8>, RepackerError> {
        let name = header
            .path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut doc: Value = match serde_json::from_slice::<Value>(&data) {
            Ok(doc) if doc.is_object() => doc,
            Ok(_) | Err(_) => {
                tracing::warn!("error unmarshaling file: {}", name);
                return Err(RepackerError::Corrupt);
            }
        };

        let base = name.rsplit('/').next().unwrap_or(&name);
        let ip = match hop_ip(base) {
            Some(ip) => ip.to_string(),
            None => {
                // We cannot identify the IP from this filename.
                tracing::warn!("skipping unparsable filename: {}", name);
                return Ok(data);
            }
        };

        let annotator = self
            .asn
            .as_ref()
            .ok_or_else(|| RepackerError::Storage("annotator not initialized".to_string()))?;
        doc["Client"]["Network"] = serde_json::to_value(annotator.annotate(&ip))
            .map_err(|err| RepackerError::Storage(err.to_string()))?;
        serde_json::to_vec(&doc).map_err(|err| RepackerError::Storage(err.to_string()))
    }

    async fn finish(&mut self, out: Target) -> Result<()> {
        let src_path = self
            .src_path
            .take()
            .context("finish called before source")?;
        // Hop archives keep their object name; only the bucket changes.
        let dst = src_path.dup(&self.out_bucket);
        tokio::time::timeout(FINISH_TIMEOUT, out.upload(self.client.as_ref(), &dst))
            .await
            .map_err(|_| anyhow::anyhow!("upload of {} timed out", dst))?
    }
}

// ===========================================================================
// Tests
// ===========================================================================
