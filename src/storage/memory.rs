use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ObjectStore, StorageError};

type Bucket = BTreeMap<String, Arc<Vec<u8>>>;

/// In-process store. Useful for dry runs of a benchmark plan and for
/// exercising the measurement pipeline without a network.
#[derive(Default)]
pub struct MemoryStore {
    buckets: Mutex<BTreeMap<String, Bucket>>,
    /// Added to every call before it touches the map
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps `latency` first, to mimic a round trip.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            buckets: Mutex::default(),
            latency: Some(latency),
        }
    }

    async fn round_trip(&self) {
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
    }

    fn with_bucket<T>(
        &self,
        bucket: &str,
        f: impl FnOnce(&mut Bucket) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut buckets = self.buckets.lock();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_owned()))?;
        f(b)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.round_trip().await;
        let mut buckets = self.buckets.lock();
        if buckets.contains_key(bucket) {
            return Err(StorageError::BucketAlreadyExists(bucket.to_owned()));
        }
        buckets.insert(bucket.to_owned(), Bucket::new());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.round_trip().await;
        let mut buckets = self.buckets.lock();
        match buckets.get(bucket) {
            None => Err(StorageError::BucketNotFound(bucket.to_owned())),
            Some(b) if !b.is_empty() => Err(StorageError::BucketNotEmpty(bucket.to_owned())),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        self.round_trip().await;
        Ok(self.buckets.lock().keys().cloned().collect())
    }

    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.round_trip().await;
        self.with_bucket(bucket, |b| {
            b.insert(key.to_owned(), Arc::new(data.to_vec()));
            Ok(())
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.round_trip().await;
        self.with_bucket(bucket, |b| {
            b.get(key)
                .map(|v| v.as_ref().clone())
                .ok_or_else(|| StorageError::ObjectNotFound {
                    bucket: bucket.to_owned(),
                    key: key.to_owned(),
                })
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.round_trip().await;
        self.with_bucket(bucket, |b| {
            b.remove(key);
            Ok(())
        })
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), StorageError> {
        self.round_trip().await;
        self.with_bucket(bucket, |b| {
            for key in keys {
                b.remove(key);
            }
            Ok(())
        })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        self.round_trip().await;
        self.with_bucket(bucket, |b| {
            Ok(b.keys()
                .filter(|k| prefix.map_or(true, |p| k.starts_with(p)))
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_lifecycle() {
        let store = MemoryStore::new();
        store.create_bucket("b").await.unwrap();
        assert_eq!(
            store.create_bucket("b").await,
            Err(StorageError::BucketAlreadyExists("b".into()))
        );

        store.put_object("b", "k1", b"hello").await.unwrap();
        store.put_object("b", "x/k2", b"world").await.unwrap();
        assert_eq!(store.get_object("b", "k1").await.unwrap(), b"hello");
        assert_eq!(store.list_objects("b", Some("x/")).await.unwrap(), vec!["x/k2"]);
        assert_eq!(
            store.delete_bucket("b").await,
            Err(StorageError::BucketNotEmpty("b".into()))
        );

        store
            .delete_objects("b", &["k1".to_string(), "x/k2".to_string()])
            .await
            .unwrap();
        store.delete_bucket("b").await.unwrap();
        assert!(store.list_buckets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_things_are_errors() {
        let store = MemoryStore::new();
        assert_eq!(
            store.put_object("nope", "k", b"").await,
            Err(StorageError::BucketNotFound("nope".into()))
        );
        store.create_bucket("b").await.unwrap();
        assert!(matches!(
            store.get_object("b", "k").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
        // deleting a missing key is fine
        store.delete_object("b", "k").await.unwrap();
    }
}
