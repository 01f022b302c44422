use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{ObjectStore, StorageError};

impl From<redis::RedisError> for StorageError {
    fn from(e: redis::RedisError) -> Self {
        StorageError::Backend(format!("redis: {e}"))
    }
}

/// Object store layered on Redis.
///
///   `<ns>:buckets`            set of bucket names
///   `<ns>:keys:<bucket>`      set of object keys in a bucket
///   `<ns>:obj:<bucket>:<key>` object body (binary string)
///
/// Clones of `ConnectionManager` share the same
/// underlying multiplexed TCP connection.
pub struct RedisStore {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisStore {
    /// Open a managed connection that auto-reconnects on failure.
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(url)
            .map_err(|e| StorageError::Backend(format!("invalid Redis URL \"{url}\": {e}")))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(conn, namespace))
    }

    pub fn from_connection(conn: ConnectionManager, namespace: &str) -> Self {
        Self {
            conn,
            namespace: namespace.to_owned(),
        }
    }

    fn buckets_key(&self) -> String {
        format!("{}:buckets", self.namespace)
    }

    fn keys_key(&self, bucket: &str) -> String {
        format!("{}:keys:{bucket}", self.namespace)
    }

    fn object_key(&self, bucket: &str, key: &str) -> String {
        format!("{}:obj:{bucket}:{key}", self.namespace)
    }

    async fn require_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.sismember(self.buckets_key(), bucket).await?;
        if exists {
            Ok(())
        } else {
            Err(StorageError::BucketNotFound(bucket.to_owned()))
        }
    }
}

#[async_trait]
impl ObjectStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(self.buckets_key(), bucket).await?;
        if added == 0 {
            return Err(StorageError::BucketAlreadyExists(bucket.to_owned()));
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.require_bucket(bucket).await?;
        let mut conn = self.conn.clone();
        let remaining: u64 = conn.scard(self.keys_key(bucket)).await?;
        if remaining > 0 {
            return Err(StorageError::BucketNotEmpty(bucket.to_owned()));
        }
        let _: i64 = conn.srem(self.buckets_key(), bucket).await?;
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        let mut conn = self.conn.clone();
        let mut names: Vec<String> = conn.smembers(self.buckets_key()).await?;
        names.sort();
        Ok(names)
    }

    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.require_bucket(bucket).await?;
        let mut conn = self.conn.clone();
        let () = redis::pipe()
            .atomic()
            .set(self.object_key(bucket, key), data)
            .ignore()
            .sadd(self.keys_key(bucket), key)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.require_bucket(bucket).await?;
        let mut conn = self.conn.clone();
        let body: Option<Vec<u8>> = conn.get(self.object_key(bucket, key)).await?;
        body.ok_or_else(|| StorageError::ObjectNotFound {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.delete_objects(bucket, &[key.to_owned()]).await
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), StorageError> {
        self.require_bucket(bucket).await?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let bodies: Vec<String> = keys.iter().map(|k| self.object_key(bucket, k)).collect();
        let () = redis::pipe()
            .atomic()
            .del(bodies)
            .ignore()
            .srem(self.keys_key(bucket), keys)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        self.require_bucket(bucket).await?;
        let mut conn = self.conn.clone();
        let mut keys: Vec<String> = conn.smembers(self.keys_key(bucket)).await?;
        if let Some(p) = prefix {
            keys.retain(|k| k.starts_with(p));
        }
        keys.sort();
        Ok(keys)
    }
}
