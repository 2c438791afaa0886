use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};

use super::path::{Scheme, StorePath};

/// Object-store operations the pipeline depends on. Implementations must
/// overwrite unconditionally on `upload` and `copy`.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Read the full contents of an object into memory.
    async fn fetch(&self, path: &StorePath) -> Result<Bytes>;

    /// Write an object, replacing any existing content.
    async fn upload(&self, path: &StorePath, data: Bytes) -> Result<()>;

    /// Enumerate every object under the given prefix.
    async fn list(&self, prefix: &StorePath) -> Result<Vec<StorePath>>;

    /// Copy an object to a new location, replacing any existing content.
    async fn copy(&self, from: &StorePath, to: &StorePath) -> Result<()>;
}

/// Production client backed by the object_store crate. One store instance
/// is built per (scheme, bucket) pair and reused for the process lifetime.
pub struct StoreClient {
    stores: Mutex<HashMap<(Scheme, String), Arc<dyn ObjectStore>>>,
}

impl StoreClient {
    pub fn new() -> Self {
        StoreClient {
            stores: Mutex::new(HashMap::new()),
        }
    }

    fn store_for(&self, path: &StorePath) -> Result<Arc<dyn ObjectStore>> {
        let key = (path.scheme, path.bucket().to_string());
        let mut stores = self.stores.lock().expect("store cache poisoned");
        if let Some(store) = stores.get(&key) {
            return Ok(Arc::clone(store));
        }
        let store: Arc<dyn ObjectStore> = match path.scheme {
            Scheme::Gs => Arc::new(
                GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(path.bucket())
                    .build()
                    .with_context(|| format!("building GCS client for {}", path.bucket()))?,
            ),
            Scheme::File => Arc::new(
                LocalFileSystem::new_with_prefix("/").context("building local filesystem store")?,
            ),
        };
        stores.insert(key, Arc::clone(&store));
        Ok(store)
    }

    fn location(path: &StorePath) -> ObjectPath {
        match path.scheme {
            Scheme::Gs => ObjectPath::from(path.object()),
            // The local store is rooted at /, so the location is the full
            // filesystem path without the leading slash.
            Scheme::File => ObjectPath::from(path.filename().trim_start_matches('/')),
        }
    }
}

impl Default for StoreClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectClient for StoreClient {
    async fn fetch(&self, path: &StorePath) -> Result<Bytes> {
        let store = self.store_for(path)?;
        let result = store
            .get(&Self::location(path))
            .await
            .with_context(|| format!("fetching {}", path))?;
        result
            .bytes()
            .await
            .with_context(|| format!("reading {}", path))
    }

    async fn upload(&self, path: &StorePath, data: Bytes) -> Result<()> {
        let store = self.store_for(path)?;
        store
            .put(&Self::location(path), PutPayload::from(data))
            .await
            .with_context(|| format!("writing {}", path))?;
        Ok(())
    }

    async fn list(&self, prefix: &StorePath) -> Result<Vec<StorePath>> {
        let store = self.store_for(prefix)?;
        let location = Self::location(prefix);
        let mut stream = store.list(Some(&location));
        let mut results = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.with_context(|| format!("listing {}", prefix))?;
            let mut p = prefix.clone();
            p.set_object(meta.location.to_string());
            results.push(p);
        }
        Ok(results)
    }

    async fn copy(&self, from: &StorePath, to: &StorePath) -> Result<()> {
        if from.scheme == to.scheme && from.bucket() == to.bucket() {
            let store = self.store_for(from)?;
            store
                .copy(&Self::location(from), &Self::location(to))
                .await
                .with_context(|| format!("copying {} to {}", from, to))?;
            return Ok(());
        }
        // Cross-bucket copies go through the client.
        let data = self.fetch(from).await?;
        self.upload(to, data).await
    }
}
