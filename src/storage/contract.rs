//! File/FS Contract (C7): the polymorphic interface every storage driver
//! implements, covering file I/O, directory listing, visibility, and
//! URL generation.

use async_trait::async_trait;
use bytes::Bytes;

use super::file::{StorageFile, TemporaryUrlOptions, WriteOptions};
use crate::deadline::Deadline;
use crate::error::StorageResult;

/// The polymorphic file/filesystem contract. Local disk and every
/// object-store driver all implement this; the Storage Manager and
/// Uploader depend only on this trait, never on a concrete driver.
///
/// Every operation takes a [`Deadline`] as its first parameter, the same
/// contract `CacheStore` follows — see its doc comment for the rules.
/// Here the blocking points are `tokio::fs` calls (local driver) and
/// `reqwest` requests (object-store drivers).
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn get(&self, deadline: &Deadline, path: &str) -> StorageResult<StorageFile>;

    /// No side effects.
    async fn exists(&self, deadline: &Deadline, path: &str) -> StorageResult<bool>;

    /// Reads full file contents.
    async fn read(&self, deadline: &Deadline, path: &str) -> StorageResult<Bytes>;

    /// Stores content. If `overwrite=false` (the `WriteOptions` default)
    /// and `path` already exists, fails with `ErrFileAlreadyExists`. MIME
    /// type comes from `opts.mime_type` if set, else is detected from the
    /// filename.
    async fn write(&self, deadline: &Deadline, path: &str, content: Bytes, opts: WriteOptions) -> StorageResult<StorageFile>;

    /// Removes a file (not a directory). Idempotent by default (missing
    /// path ⇒ success); pass `strict=true` to get `ErrFileNotFound` on a
    /// missing path instead.
    async fn delete(&self, deadline: &Deadline, path: &str, strict: bool) -> StorageResult<()>;

    async fn create_directory(&self, deadline: &Deadline, path: &str, opts: WriteOptions) -> StorageResult<()>;

    /// Removes the directory and all its contents, recursively.
    async fn delete_directory(&self, deadline: &Deadline, path: &str) -> StorageResult<()>;

    /// Non-recursive file listing.
    async fn files(&self, deadline: &Deadline, dir: &str) -> StorageResult<Vec<StorageFile>>;

    /// Recursive file listing.
    async fn all_files(&self, deadline: &Deadline, dir: &str) -> StorageResult<Vec<StorageFile>>;

    /// Non-recursive subdirectory listing.
    async fn directories(&self, deadline: &Deadline, dir: &str) -> StorageResult<Vec<StorageFile>>;

    /// Recursive subdirectory listing.
    async fn all_directories(&self, deadline: &Deadline, dir: &str) -> StorageResult<Vec<StorageFile>>;

    /// `Move` is `Copy` then `Delete(source)`: on copy failure, source is
    /// left intact; on a post-copy delete failure, the destination exists
    /// and the caller observes an error.
    async fn copy(&self, deadline: &Deadline, source: &str, dest: &str) -> StorageResult<()>;

    async fn mv(&self, deadline: &Deadline, source: &str, dest: &str) -> StorageResult<()> {
        if source == dest {
            return Ok(());
        }
        self.copy(deadline, source, dest).await?;
        self.delete(deadline, source, false).await
    }

    async fn size(&self, deadline: &Deadline, path: &str) -> StorageResult<u64>;
    async fn last_modified(&self, deadline: &Deadline, path: &str) -> StorageResult<chrono::DateTime<chrono::Utc>>;
    async fn mime_type(&self, deadline: &Deadline, path: &str) -> StorageResult<Option<String>>;
    async fn visibility(&self, deadline: &Deadline, path: &str) -> StorageResult<super::file::Visibility>;
    async fn set_visibility(&self, deadline: &Deadline, path: &str, visibility: super::file::Visibility) -> StorageResult<()>;

    /// `"md5"` / `"sha256"` / `"etag"`; `ErrUnsupported` for anything the
    /// driver cannot compute.
    async fn checksum(&self, deadline: &Deadline, path: &str, algorithm: &str) -> StorageResult<String>;

    /// Public URL if available; for private files MAY return a
    /// short-lived signed URL instead.
    async fn url(&self, deadline: &Deadline, path: &str) -> StorageResult<String>;

    /// Signed, time-bounded URL; expiry is driver-enforced.
    async fn temporary_url(&self, deadline: &Deadline, path: &str, opts: TemporaryUrlOptions) -> StorageResult<String>;
}
