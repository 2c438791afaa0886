use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::asn::AsnAnnotator;
use super::rewrite_datatype;
use crate::archive::{Source, Target};
use crate::errors::RepackerError;
use crate::process::Processor;
use crate::routeview::DatasetLocator;
use crate::storage::{ObjectClient, StorePath};

/// Deadline for concluding one archive, including the upload.
const FINISH_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// One query result row: the archive to repack plus the per-file
/// destination IPs used to rebuild annotations.
#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationRow {
    #[serde(rename = "ArchiveURL")]
    pub archive_url: String,
    #[serde(rename = "Files", default)]
    pub files: Vec<FileTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileTarget {
    #[serde(rename = "DstIP")]
    pub dst_ip: String,
    #[serde(rename = "Filename")]
    pub filename: String,
}

/// AnnotationProcessor rewrites the Client.Network annotation of every
/// annotation file using the routeview datasets for the archive's date.
///
/// Per-row state (the filename -> IP map and the source path) is reset by
/// each `source` call and consumed by `file` and `finish`.
pub struct AnnotationProcessor {
    client: Arc<dyn ObjectClient>,
    out_bucket: String,
    rv4_prefix: String,
    rv6_prefix: String,
    asnames_url: String,
    from_datatype: String,
    new_datatype: String,
    asn: Option<AsnAnnotator>,
    files: HashMap<String, String>,
    src_path: Option<StorePath>,
}

impl AnnotationProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ObjectClient>,
        out_bucket: &str,
        rv4_prefix: &str,
        rv6_prefix: &str,
        asnames_url: &str,
        from_datatype: &str,
        new_datatype: &str,
    ) -> AnnotationProcessor {
        AnnotationProcessor {
            client,
            out_bucket: out_bucket.to_string(),
            rv4_prefix: rv4_prefix.to_string(),
            rv6_prefix: rv6_prefix.to_string(),
            asnames_url: asnames_url.to_string(),
            from_datatype: from_datatype.to_string(),
            new_datatype: new_datatype.to_string(),
            asn: None,
            files: HashMap::new(),
            src_path: None,
        }
    }

    fn annotator(&self) -> Result<&AsnAnnotator, RepackerError> {
        self.asn
            .as_ref()
            .ok_or_else(|| RepackerError::Storage("annotator not initialized".to_string()))
    }
}

/// Download the per-date routeview datasets and AS names, and build the
/// annotator. Shared with the hop processor.
pub(super) async fn build_annotator(
    client: &Arc<dyn ObjectClient>,
    date: &str,
    rv4_prefix: &str,
    rv6_prefix: &str,
    asnames_url: &str,
) -> Result<AsnAnnotator> {
    let rv4 = DatasetLocator::new(Arc::clone(client), rv4_prefix)?
        .find(date)
        .await
        .context("locating IPv4 routeview dataset")?;
    let v4 = client.fetch(&rv4).await.context("fetching IPv4 routeview dataset")?;

    let rv6 = DatasetLocator::new(Arc::clone(client), rv6_prefix)?
        .find(date)
        .await
        .context("locating IPv6 routeview dataset")?;
    let v6 = client.fetch(&rv6).await.context("fetching IPv6 routeview dataset")?;

    let names = client
        .fetch(&StorePath::parse(asnames_url)?)
        .await
        .context("fetching AS names")?;

    tracing::info!("loaded routeview datasets for {}: {} and {}", date, rv4, rv6);
    AsnAnnotator::parse(&v4, &v6, &names)
}

fn entry_name(header: &tar::Header) -> String {
    header
        .path()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl Processor for AnnotationProcessor {
    type Row = AnnotationRow;

    async fn init(&mut self, date: &str) -> Result<()> {
        let annotator = build_annotator(
            &self.client,
            date,
            &self.rv4_prefix,
            &self.rv6_prefix,
            &self.asnames_url,
        )
        .await?;
        self.asn = Some(annotator);
        Ok(())
    }

    async fn source(&mut self, row: &Self::Row) -> Result<Source> {
        tracing::info!("starting {}", row.archive_url);
        // Collect files from the query so missing files can be counted.
        self.files = row
            .files
            .iter()
            .map(|f| (f.filename.clone(), f.dst_ip.clone()))
            .collect();
        let src = Source::from_url(self.client.as_ref(), &row.archive_url)
            .await
            .with_context(|| format!("failed to create new source for {}", row.archive_url))?;
        self.src_path = Some(src.path.clone());
        Ok(src)
    }

    fn file(&mut self, header: &tar::Header, data: Vec<u8>) -> Result<Vec<u8>, RepackerError> {
        let name = entry_name(header);

        let mut doc: Value = match serde_json::from_slice(&data) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!("error unmarshaling file {}: {}", name, err);
                self.files.remove(&name);
                return Err(RepackerError::Corrupt);
            }
        };
        if !doc.is_object() {
            tracing::warn!("annotation file {} is not an object", name);
            self.files.remove(&name);
            return Err(RepackerError::Corrupt);
        }

        // Without a destination IP from the query we cannot rebuild the
        // annotation; keep the original content.
        let ip = match self.files.remove(&name) {
            Some(ip) => ip,
            None => {
                tracing::warn!("missing file from query results: {}", name);
                return Ok(data);
            }
        };

        // Recreate the Network annotation using the client IP.
        let network = self.annotator()?.annotate(&ip);
        doc["Client"]["Network"] = serde_json::to_value(network)
            .map_err(|err| RepackerError::Storage(err.to_string()))?;
        serde_json::to_vec(&doc).map_err(|err| RepackerError::Storage(err.to_string()))
    }

    async fn finish(&mut self, out: Target) -> Result<()> {
        if !self.files.is_empty() {
            tracing::warn!(
                "{} files from query not updated in archive {:?}",
                self.files.len(),
                self.src_path
            );
        }
        let src_path = self
            .src_path
            .take()
            .context("finish called before source")?;
        let mut dst = src_path.dup(&self.out_bucket);
        dst.set_object(rewrite_datatype(
            dst.object(),
            &self.from_datatype,
            &self.new_datatype,
        ));
        tokio::time::timeout(FINISH_TIMEOUT, out.upload(self.client.as_ref(), &dst))
            .await
            .map_err(|_| anyhow::anyhow!("upload of {} timed out", dst))?
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct NullStore;

    #[async_trait]
    impl ObjectClient for NullStore {
        async fn fetch(&self, _path: &StorePath) -> Result<Bytes> {
            anyhow::bail!("not implemented")
        }
        async fn upload(&self, _path: &StorePath, _data: Bytes) -> Result<()> {
            anyhow::bail!("not implemented")
        }
        async fn list(&self, _prefix: &StorePath) -> Result<Vec<StorePath>> {
            anyhow::bail!("not implemented")
        }
        async fn copy(&self, _from: &StorePath, _to: &StorePath) -> Result<()> {
            anyhow::bail!("not implemented")
        }
    }

    fn test_processor() -> AnnotationProcessor {
        let mut p = AnnotationProcessor::new(
            Arc::new(NullStore),
            "out-bucket",
            "gs://dl/RouteViewIPv4",
            "gs://dl/RouteViewIPv6",
            "gs://dl/asnames.csv",
            "annotation",
            "annotation2",
        );
        p.asn = Some(
            AsnAnnotator::parse(
                b"1.0.0.0\t24\t13335\n",
                b"2001:db8::\t32\t64496\n",
                b"AS13335,Cloudflare\n",
            )
            .unwrap(),
        );
        p.files = HashMap::from([("a.json".to_string(), "1.0.0.9".to_string())]);
        p
    }

    fn header(name: &str) -> tar::Header {
        let mut h = tar::Header::new_gnu();
        h.set_path(name).unwrap();
        h.set_cksum();
        h
    }

    #[test]
    fn test_file_rewrites_network_annotation() {
        let mut p = test_processor();
        let doc = serde_json::json!({
            "UUID": "x",
            "Client": {"Geo": {"City": "x"}, "Network": {"ASNumber": 999, "Missing": false}},
            "Server": {"Site": "chs0t"},
        });
        let out = p
            .file(&header("a.json"), serde_json::to_vec(&doc).unwrap())
            .unwrap();
        let v: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["Client"]["Network"]["ASNumber"], 13335);
        assert_eq!(v["Client"]["Network"]["ASName"], "Cloudflare");
        // Unrelated fields survive the rewrite.
        assert_eq!(v["UUID"], "x");
        assert_eq!(v["Client"]["Geo"]["City"], "x");
        assert_eq!(v["Server"]["Site"], "chs0t");
        // The per-row map is consumed.
        assert!(p.files.is_empty());
    }

    #[test]
    fn test_file_invalid_json_is_corrupt() {
        let mut p = test_processor();
        let err = p.file(&header("a.json"), b"not json".to_vec()).unwrap_err();
        assert!(matches!(err, RepackerError::Corrupt));
        // Corrupt files no longer count as missing in finish.
        assert!(p.files.is_empty());
    }

    #[test]
    fn test_file_missing_from_query_returns_original() {
        let mut p = test_processor();
        let original = serde_json::to_vec(&serde_json::json!({"Client": {}})).unwrap();
        let out = p.file(&header("other.json"), original.clone()).unwrap();
        assert_eq!(out, original);
        // The unrelated entry in the map stays.
        assert_eq!(p.files.len(), 1);
    }
}
