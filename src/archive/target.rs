use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::storage::{retry, ObjectClient, StorePath};

/// Maximum time allowed for a single archive upload.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// A Target is a single, compressed tar archive built in memory, containing
/// files to be uploaded to the object store.
pub struct Target {
    /// The number of files written to the archive.
    pub count: usize,
    builder: tar::Builder<GzEncoder<Vec<u8>>>,
}

impl Target {
    pub fn new() -> Target {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        Target {
            count: 0,
            builder: tar::Builder::new(encoder),
        }
    }

    /// Append a single file with the given header and contents. A None
    /// header is a no-op. The tar and gzip streams are flushed after every
    /// file so the in-memory size stays accurate.
    pub fn add_file(&mut self, header: Option<&tar::Header>, contents: &[u8]) -> Result<()> {
        let header = match header {
            Some(h) => h,
            None => return Ok(()),
        };
        self.builder
            .append(header, contents)
            .with_context(|| format!("writing archive entry {:?}", header.path()))?;
        self.builder
            .get_mut()
            .flush()
            .context("flushing archive encoder")?;
        self.count += 1;
        Ok(())
    }

    /// Current length of the compressed archive buffer.
    pub fn compressed_len(&self) -> usize {
        self.builder.get_ref().get_ref().len()
    }

    /// Finalize the tar then gzip streams and return the compressed blob.
    pub fn finish(self) -> Result<Vec<u8>> {
        let encoder = self
            .builder
            .into_inner()
            .context("finalizing tar stream")?;
        encoder.finish().context("finalizing gzip stream")
    }

    /// Finalize the archive and write it to the named path, overwriting any
    /// existing object. The upload is retried once and bounded by a
    /// 20-minute deadline.
    pub async fn upload(self, client: &dyn ObjectClient, path: &StorePath) -> Result<()> {
        let count = self.count;
        let contents = bytes::Bytes::from(self.finish()?);
        tokio::time::timeout(UPLOAD_TIMEOUT, async {
            retry(1, || client.upload(path, contents.clone())).await
        })
        .await
        .map_err(|_| anyhow::anyhow!("upload of {} timed out", path))??;
        tracing::info!("uploaded {} files ({} bytes) to {}", count, contents.len(), path);
        Ok(())
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
