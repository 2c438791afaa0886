use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Datelike;

use crate::models::parse_date;
use crate::storage::{ObjectClient, StorePath};

/// DatasetLocator finds the per-date routeview prefix2as archive under an
/// object-store prefix.
pub struct DatasetLocator {
    client: Arc<dyn ObjectClient>,
    prefix: StorePath,
    version: &'static str,
}

impl DatasetLocator {
    /// Create a locator for files under the given prefix URL. Prefixes
    /// containing "IPv6" hold rv6 datasets; all others hold rv2.
    pub fn new(client: Arc<dyn ObjectClient>, prefix: &str) -> Result<DatasetLocator> {
        let prefix = StorePath::parse(prefix)?;
        let version = if prefix.object().contains("IPv6") {
            "rv6"
        } else {
            "rv2"
        };
        Ok(DatasetLocator {
            client,
            prefix,
            version,
        })
    }

    /// Return the routeview prefix2as URL for the named date.
    ///
    /// Searches `<prefix>/YYYY/MM/` for the first object whose base name
    /// begins with `routeviews-{version}-YYYYMMDD`, e.g.
    /// gs://downloader/RouteViewIPv4/2023/02/routeviews-rv2-20230205-2200.pfx2as.gz
    pub async fn find(&self, date: &str) -> Result<StorePath> {
        let d = parse_date(date)?;
        let month_prefix = self
            .prefix
            .child(&format!("{:04}/{:02}", d.year(), d.month()));
        let want = format!(
            "routeviews-{}-{:04}{:02}{:02}",
            self.version,
            d.year(),
            d.month(),
            d.day()
        );
        for object in self.client.list(&month_prefix).await? {
            if object.base_name().starts_with(&want) {
                return Ok(object);
            }
        }
        bail!("no {} routeview file found for {}", self.version, date)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
