//! The storage collaborator the benchmark drives.
//!
//! Every backend exposes the same bucket/object calls; the phase runner
//! only ever sees `dyn ObjectStore`.

pub mod fs;
pub mod memory;
pub mod redis_store;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::fs::FsStore;
pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("bucket '{0}' not found")]
    BucketNotFound(String),

    #[error("bucket '{0}' already exists")]
    BucketAlreadyExists(String),

    #[error("bucket '{0}' is not empty")]
    BucketNotEmpty(String),

    #[error("object '{key}' not found in bucket '{bucket}'")]
    ObjectNotFound { bucket: String, key: String },

    #[error("{0}")]
    Backend(String),
}

/// Bucket and object operations, synchronous from the caller's view:
/// each call returns once the backend has answered.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name used in logs and report headers.
    fn name(&self) -> &str;

    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Fails with `BucketNotEmpty` while objects remain.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    async fn list_buckets(&self) -> Result<Vec<String>, StorageError>;

    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Deleting a missing key succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), StorageError>;

    /// Keys in lexical order, restricted to `prefix` when given.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, StorageError>;
}

/// Retry a setup call `attempts` times, sleeping `base * attempt`
/// between tries. Only meant for client construction and bucket creation.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    attempts: u32,
    base: Duration,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                tracing::warn!(%label, attempt, error = %e, "retrying");
                tokio::time::sleep(base * attempt).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(StorageError::Backend(format!(
                    "{label} failed after {attempts} attempts: {e}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out = with_retry("create bucket", 3, Duration::from_millis(1), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(StorageError::Backend("flaky".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(out, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out: Result<(), _> = with_retry("connect", 2, Duration::from_millis(1), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Backend("down".into()))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match out {
            Err(StorageError::Backend(msg)) => assert!(msg.contains("after 2 attempts")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
