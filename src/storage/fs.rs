use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{ObjectStore, StorageError};

/// Buckets as directories under `root`, one file per object.
/// Keys are escaped so `/` stays inside a single file name.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.bucket_dir(bucket).join(escape_key(key))
    }

    async fn require_bucket(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        let dir = self.bucket_dir(bucket);
        match tokio::fs::metadata(&dir).await {
            Ok(m) if m.is_dir() => Ok(dir),
            Ok(_) => Err(StorageError::BucketNotFound(bucket.to_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::BucketNotFound(bucket.to_owned()))
            }
            Err(e) => Err(io_err(&dir, e)),
        }
    }
}

fn io_err(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Backend(format!("{}: {e}", path.display()))
}

fn escape_key(key: &str) -> String {
    key.replace('%', "%25").replace('/', "%2F")
}

fn unescape_key(name: &str) -> String {
    name.replace("%2F", "/").replace("%25", "%")
}

#[async_trait]
impl ObjectStore for FsStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_err(&self.root, e))?;
        let dir = self.bucket_dir(bucket);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StorageError::BucketAlreadyExists(bucket.to_owned()))
            }
            Err(e) => Err(io_err(&dir, e)),
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let dir = self.require_bucket(bucket).await?;
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| io_err(&dir, e))?;
        if entries
            .next_entry()
            .await
            .map_err(|e| io_err(&dir, e))?
            .is_some()
        {
            return Err(StorageError::BucketNotEmpty(bucket.to_owned()));
        }
        tokio::fs::remove_dir(&dir).await.map_err(|e| io_err(&dir, e))
    }

    async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.root, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&self.root, e))? {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.require_bucket(bucket).await?;
        let path = self.object_path(bucket, key);
        tokio::fs::write(&path, data).await.map_err(|e| io_err(&path, e))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.require_bucket(bucket).await?;
        let path = self.object_path(bucket, key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::ObjectNotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            }),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.require_bucket(bucket).await?;
        let path = self.object_path(bucket, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            self.delete_object(bucket, key).await?;
        }
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        let dir = self.require_bucket(bucket).await?;
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| io_err(&dir, e))?;

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&dir, e))? {
            let key = unescape_key(&entry.file_name().to_string_lossy());
            if prefix.map_or(true, |p| key.starts_with(p)) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
