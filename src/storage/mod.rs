pub mod client;
pub mod path;

pub use client::{ObjectClient, StoreClient};
pub use path::{Scheme, StorePath};

use std::future::Future;
use std::time::Duration;

/// Run `op` up to `1 + max_retries` times, sleeping 1s before the first
/// retry and doubling afterwards.
pub async fn retry<T, F, Fut>(max_retries: usize, mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut wait = Duration::from_secs(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) if attempt < max_retries => {
                tracing::warn!("attempt {} failed, retrying in {:?}: {}", attempt, wait, err);
                tokio::time::sleep(wait).await;
                wait *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_after_failure() {
        tokio::time::pause();
        let calls = AtomicUsize::new(0);
        let result = retry(1, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(anyhow::anyhow!("transient"))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        tokio::time::pause();
        let calls = AtomicUsize::new(0);
        let result: anyhow::Result<()> = retry(2, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("permanent"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
