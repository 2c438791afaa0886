use std::collections::VecDeque;
use std::io::Read;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;

use crate::storage::{retry, ObjectClient, StorePath};

/// Source reads the files of a gzipped tar archive that has been fully
/// buffered in memory.
///
/// The compressed blob is decoded up front; `next_file` then yields one
/// regular file at a time. Non-regular entries (directories, symlinks,
/// devices) are skipped during decode and are never counted. A truncated
/// stream is treated as a normal end of archive: every file decoded before
/// the truncation is kept.
pub struct Source {
    /// The original archive URL.
    pub path: StorePath,
    /// The number of files read from the archive so far.
    pub count: usize,
    /// Byte length of the buffered compressed archive.
    pub size: usize,
    entries: VecDeque<(tar::Header, Vec<u8>)>,
}

impl Source {
    /// Decode a compressed archive already held in memory.
    pub fn from_bytes(path: StorePath, compressed: &[u8]) -> Result<Source> {
        let mut archive = tar::Archive::new(GzDecoder::new(compressed));
        let mut entries = VecDeque::new();

        let iter = archive
            .entries()
            .with_context(|| format!("reading tar archive {}", path))?;
        for entry in iter {
            let mut entry = match entry {
                Ok(e) => e,
                // Truncated gzip or tar stream: keep what we have.
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => {
                    return Err(err).with_context(|| format!("reading tar entry in {}", path))
                }
            };
            if !entry.header().entry_type().is_file() {
                tracing::warn!(
                    "unsupported file type in {}: {:?} {:?}",
                    path,
                    entry.path().unwrap_or_default(),
                    entry.header().entry_type()
                );
                continue;
            }
            let mut header = entry.header().clone();
            let name = entry
                .path()
                .with_context(|| format!("reading entry name in {}", path))?
                .into_owned();
            let mut data = Vec::with_capacity(entry.size() as usize);
            match entry.read_to_end(&mut data) {
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => {
                    return Err(err).with_context(|| format!("reading entry data in {}", path))
                }
            }
            // Carry long names resolved from PAX/GNU extensions back onto
            // the header so downstream consumers see the full path.
            header
                .set_path(&name)
                .with_context(|| format!("entry name too long in {}: {:?}", path, name))?;
            header.set_cksum();
            entries.push_back((header, data));
        }

        Ok(Source {
            path,
            count: 0,
            size: compressed.len(),
            entries,
        })
    }

    /// Download an archive from the object store and decode it. The
    /// download is retried once on error.
    pub async fn from_url(client: &dyn ObjectClient, url: &str) -> Result<Source> {
        let path = StorePath::parse_archive(url)?;
        let compressed = retry(1, || client.fetch(&path)).await?;
        Source::from_bytes(path, &compressed)
    }

    /// Read a local archive file. The url should be of the form
    /// file:///path/to/filename.tgz.
    pub fn from_file(url: &str) -> Result<Source> {
        let path = StorePath::parse_archive(url)?;
        let compressed =
            std::fs::read(path.filename()).with_context(|| format!("reading {}", path))?;
        Source::from_bytes(path, &compressed)
    }

    /// The next regular file of the archive, or None at end of archive.
    /// Each returned file increments `count`.
    pub fn next_file(&mut self) -> Option<(tar::Header, Vec<u8>)> {
        let (header, data) = self.entries.pop_front()?;
        self.count += 1;
        Some((header, data))
    }
}

/// Duplicate a tar header, suitable for use in a new archive. The copy is
/// independent: updating its size or name does not affect the original.
pub fn copy_header(h: &tar::Header) -> tar::Header {
    h.clone()
}

// ===========================================================================
// Tests
// ===========================================================================
