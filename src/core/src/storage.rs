//! Object store implementations: in-memory for tests, filesystem for the CLI.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::error::{MirrorError, Result};
use crate::services::{ByteStream, ObjectStore};

/// Object store holding complete objects in memory.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<(String, String), Bytes>>,
    put_attempts: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys stored in a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .read()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Number of `put_object_stream` calls, successful or not.
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object_stream(&self, bucket: &str, key: &str, mut body: ByteStream) -> Result<u64> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                MirrorError::internal(format!("Upload of '{bucket}/{key}' aborted: {e}"))
                    .with_context("bucket", bucket)
                    .with_context("key", key)
            })?;
            buffer.extend_from_slice(&chunk);
        }
        let size = buffer.len() as u64;
        self.insert(bucket, key, buffer.freeze());
        Ok(size)
    }

    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ByteStream> {
        let data = self.get(bucket, key).ok_or_else(|| {
            MirrorError::not_found(format!("Object '{bucket}/{key}' was not found"))
        })?;
        Ok(Box::pin(futures::stream::iter([Ok(data)])))
    }
}

/// Object store writing `<root>/<bucket>/<key>` files.
///
/// Uploads go to a `.partial` sibling and are renamed into place only after
/// the whole stream has been written.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an object path, rejecting keys that escape the bucket.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for part in [bucket, key] {
            let relative = Path::new(part);
            if part.is_empty()
                || !relative
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)))
            {
                return Err(MirrorError::bad_request(format!(
                    "Invalid object location '{bucket}/{key}'"
                )));
            }
            path.push(relative);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_object_stream(&self, bucket: &str, key: &str, mut body: ByteStream) -> Result<u64> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut partial = path.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(MirrorError::internal(format!(
                        "Upload of '{bucket}/{key}' aborted: {e}"
                    ))
                    .with_context("bucket", bucket)
                    .with_context("key", key));
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&partial, &path).await?;
        tracing::debug!(bucket, key, bytes = written, "Stored object");
        Ok(written)
    }

    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ByteStream> {
        let path = self.object_path(bucket, key)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MirrorError::not_found(format!(
                    "Object '{bucket}/{key}' was not found"
                )))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Box::pin(ReaderStream::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    fn chunks(parts: Vec<std::io::Result<&'static [u8]>>) -> ByteStream {
        Box::pin(stream::iter(
            parts
                .into_iter()
                .map(|part| part.map(Bytes::from_static)),
        ))
    }

    async fn collect(mut body: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    // ========================================================================
    // MemoryObjectStore
    // ========================================================================

    #[tokio::test]
    async fn test_memory_put_get() {
        let store = MemoryObjectStore::new();
        let size = store
            .put_object_stream("b", "k", chunks(vec![Ok(b"hello "), Ok(b"world")]))
            .await
            .unwrap();
        assert_eq!(size, 11);
        let body = store.get_object_stream("b", "k").await.unwrap();
        assert_eq!(collect(body).await, b"hello world");
        assert_eq!(store.keys("b"), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_stream_error_stores_nothing() {
        let store = MemoryObjectStore::new();
        let err = std::io::Error::new(std::io::ErrorKind::Other, "source failed");
        let result = store
            .put_object_stream("b", "k", chunks(vec![Ok(b"partial"), Err(err)]))
            .await;
        assert!(result.is_err());
        assert!(store.get("b", "k").is_none());
        assert_eq!(store.put_attempts(), 1);
    }

    #[tokio::test]
    async fn test_memory_get_missing() {
        let store = MemoryObjectStore::new();
        let err = store.get_object_stream("b", "missing").await.err().unwrap();
        assert_eq!(err.status_code(), 404);
    }

    // ========================================================================
    // FsObjectStore
    // ========================================================================

    #[tokio::test]
    async fn test_fs_put_get() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .put_object_stream("exports", "abc/files/f1.tar.gz", chunks(vec![Ok(b"data")]))
            .await
            .unwrap();
        assert!(dir.path().join("exports/abc/files/f1.tar.gz").exists());
        let body = store
            .get_object_stream("exports", "abc/files/f1.tar.gz")
            .await
            .unwrap();
        assert_eq!(collect(body).await, b"data");
    }

    #[tokio::test]
    async fn test_fs_stream_error_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        let err = std::io::Error::new(std::io::ErrorKind::Other, "source failed");
        let result = store
            .put_object_stream("b", "k.tar.gz", chunks(vec![Ok(b"partial"), Err(err)]))
            .await;
        assert!(result.is_err());
        assert!(!dir.path().join("b/k.tar.gz").exists());
        assert!(!dir.path().join("b/k.tar.gz.partial").exists());
    }

    #[test]
    fn test_fs_rejects_escaping_keys() {
        let store = FsObjectStore::new("/tmp/store");
        assert!(store.object_path("b", "../etc/passwd").is_err());
        assert!(store.object_path("b", "/abs").is_err());
        assert!(store.object_path("", "k").is_err());
        assert!(store.object_path("b", "a/b/c").is_ok());
    }
}
