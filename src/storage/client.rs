//! Thin, stats-tracking façade over a single `FileStore`. Mirrors
//! `CacheClient`'s relationship to `CacheStore`: a disk handle that
//! counts uploads/downloads/deletes instead of exposing only the raw
//! trait object.

use parking_lot::RwLock;
use std::sync::Arc;

use super::contract::FileStore;
use super::file::{StorageFile, WriteOptions};
use crate::deadline::Deadline;
use crate::error::StorageResult;

use bytes::Bytes;

#[derive(Debug, Default, Clone, Copy)]
pub struct DiskStats {
    pub upload_count: u64,
    pub download_count: u64,
    pub delete_count: u64,
    pub errors: u64,
}

/// Wraps a `FileStore` to count uploads (`write`), downloads (`read`), and
/// deletes, the way `CacheClient` counts hits/misses/sets/deletes around a
/// `CacheStore`.
#[derive(Clone)]
pub struct StorageClient {
    disk: Arc<dyn FileStore>,
    stats: Arc<RwLock<DiskStats>>,
}

impl StorageClient {
    pub fn new(disk: Arc<dyn FileStore>) -> Self {
        Self { disk, stats: Arc::new(RwLock::new(DiskStats::default())) }
    }

    pub fn stats(&self) -> DiskStats {
        *self.stats.read()
    }

    pub fn disk(&self) -> Arc<dyn FileStore> {
        self.disk.clone()
    }

    pub async fn read(&self, deadline: &Deadline, path: &str) -> StorageResult<Bytes> {
        let result = self.disk.read(deadline, path).await;
        match &result {
            Ok(_) => self.stats.write().download_count += 1,
            Err(_) => self.stats.write().errors += 1,
        }
        result
    }

    pub async fn write(&self, deadline: &Deadline, path: &str, content: Bytes, opts: WriteOptions) -> StorageResult<StorageFile> {
        let result = self.disk.write(deadline, path, content, opts).await;
        match &result {
            Ok(_) => self.stats.write().upload_count += 1,
            Err(_) => self.stats.write().errors += 1,
        }
        result
    }

    pub async fn delete(&self, deadline: &Deadline, path: &str, strict: bool) -> StorageResult<()> {
        let result = self.disk.delete(deadline, path, strict).await;
        match &result {
            Ok(_) => self.stats.write().delete_count += 1,
            Err(_) => self.stats.write().errors += 1,
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalDiskDriverBuilder;

    fn temp_root() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("unicache-storage-client-test-{}", fastrand::u64(..)));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn counts_uploads_downloads_and_deletes() {
        let root = temp_root();
        let client = StorageClient::new(Arc::new(LocalDiskDriverBuilder::new(&root).build()));

        client.write(&Deadline::none(), "a.txt", Bytes::from_static(b"hi"), WriteOptions::new()).await.unwrap();
        client.read(&Deadline::none(), "a.txt").await.unwrap();
        client.delete(&Deadline::none(), "a.txt", false).await.unwrap();

        let stats = client.stats();
        assert_eq!(stats.upload_count, 1);
        assert_eq!(stats.download_count, 1);
        assert_eq!(stats.delete_count, 1);
        assert_eq!(stats.errors, 0);
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn failed_operations_count_as_errors() {
        let root = temp_root();
        let client = StorageClient::new(Arc::new(LocalDiskDriverBuilder::new(&root).build()));

        let result = client.read(&Deadline::none(), "missing.txt").await;
        assert!(result.is_err());
        assert_eq!(client.stats().errors, 1);
        std::fs::remove_dir_all(root).ok();
    }
}
