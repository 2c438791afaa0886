pub mod copier;
pub mod manager;
pub mod worker;

pub use copier::{Copier, Renamer};
pub use manager::Manager;
pub use worker::run_worker;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::archive::{Source, Target};
use crate::errors::RepackerError;

/// The per-datatype transformation plug-in. All work is batched per date,
/// and every file of every archive passes through `file`.
///
/// For a given row, `source` -> `file`* -> `finish` form a single logical
/// transaction: `source` resets any per-row state (e.g. a filename lookup
/// map) that `file` and `finish` consume. Calls are strictly sequential
/// within a worker, so implementations may rely on that ordering.
#[async_trait]
pub trait Processor: Send {
    /// The query result row type this processor consumes.
    type Row: DeserializeOwned + Send + Sync;

    /// Prepare for processing the given date, e.g. by downloading the
    /// date's auxiliary datasets.
    async fn init(&mut self, date: &str) -> Result<()>;

    /// Open the source archive for a result row, resetting per-row state.
    async fn source(&mut self, row: &Self::Row) -> Result<Source>;

    /// Transform one file's content. Return `RepackerError::Corrupt` only
    /// when the content is corrupt and must be dropped from the output;
    /// content that cannot be transformed for other reasons should be
    /// returned unchanged.
    fn file(&mut self, header: &tar::Header, data: Vec<u8>) -> Result<Vec<u8>, RepackerError>;

    /// Conclude an archive after all files have been processed, e.g. by
    /// uploading it to the output location.
    async fn finish(&mut self, out: Target) -> Result<()>;
}

/// A per-date unit of work driven by the worker loop.
#[async_trait]
pub trait DateProcessor: Send {
    async fn process_date(&mut self, date: &str) -> Result<()>;
}
