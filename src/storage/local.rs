//! Local Disk Driver (C8): the File/FS Contract over the host filesystem.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::contract::FileStore;
use super::file::{
    file_name, normalize_dir_path, normalize_path, StorageFile, TemporaryUrlOptions, Visibility,
    WriteOptions,
};
use crate::deadline::{guard, Deadline};
use crate::error::{StorageError, StorageResult};

/// Extension appended to build a sidecar path (e.g. `a.txt` ->
/// `a.txt.unicache-meta.json`) that carries the MIME type and metadata a
/// plain filesystem has no native place to keep.
const SIDECAR_SUFFIX: &str = ".unicache-meta.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    mime_type: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct LocalDriverConfig {
    pub root: PathBuf,
    pub public_url_prefix: Option<String>,
    pub default_visibility: Visibility,
}

impl Default for LocalDriverConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            public_url_prefix: None,
            default_visibility: Visibility::Private,
        }
    }
}

pub struct LocalDiskDriver {
    config: LocalDriverConfig,
}

impl LocalDiskDriver {
    pub fn new(config: LocalDriverConfig) -> Self {
        Self { config }
    }

    /// Resolves `path` beneath `root`, refusing anything that would
    /// escape it after normalization. A plain component walk is used
    /// rather than `std::fs::canonicalize`, since the target path may not
    /// exist yet (e.g. a pending `write`).
    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let normalized = normalize_path(path);
        let mut resolved = self.config.root.clone();
        let mut depth = 0i32;
        for component in Path::new(&normalized).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(StorageError::InvalidPath(path.to_string()));
                    }
                    resolved.pop();
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath(path.to_string()));
                }
            }
        }
        Ok(resolved)
    }

    fn sidecar_path(absolute: &Path) -> PathBuf {
        let mut name = absolute.as_os_str().to_os_string();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    /// Best-effort: a missing or unreadable sidecar just means no stored
    /// MIME override or metadata, not an error.
    async fn read_sidecar(absolute: &Path) -> Sidecar {
        match tokio::fs::read(Self::sidecar_path(absolute)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Sidecar::default(),
        }
    }

    async fn write_sidecar(absolute: &Path, sidecar: &Sidecar) -> StorageResult<()> {
        if sidecar.mime_type.is_none() && sidecar.metadata.is_empty() {
            let _ = tokio::fs::remove_file(Self::sidecar_path(absolute)).await;
            return Ok(());
        }
        let payload = serde_json::to_vec(sidecar)
            .map_err(|e| StorageError::Backend { op: "write_sidecar", path: None, source: anyhow::Error::new(e) })?;
        tokio::fs::write(Self::sidecar_path(absolute), payload).await.map_err(StorageError::Io)
    }

    async fn stat(&self, path: &str, absolute: &Path) -> StorageResult<StorageFile> {
        let meta = tokio::fs::metadata(absolute)
            .await
            .map_err(|_| StorageError::FileNotFound(path.to_string()))?;
        let modified = meta
            .modified()
            .map(chrono::DateTime::<chrono::Utc>::from)
            .unwrap_or_else(|_| chrono::Utc::now());
        let is_directory = meta.is_dir();
        let sidecar = if is_directory { Sidecar::default() } else { Self::read_sidecar(absolute).await };
        Ok(StorageFile {
            path: normalize_path(path),
            name: file_name(path).to_string(),
            size: meta.len(),
            last_modified: modified,
            mime_type: if is_directory {
                None
            } else {
                sidecar.mime_type.or_else(|| mime_guess::from_path(path).first().map(|m| m.to_string()))
            },
            visibility: unix_visibility(&meta),
            is_directory,
            metadata: sidecar.metadata,
        })
    }

    fn public_url(&self, path: &str) -> String {
        let normalized = normalize_path(path);
        match &self.config.public_url_prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), normalized),
            None => format!("/{}", normalized),
        }
    }

    async fn walk(&self, deadline: &Deadline, dir: &str, recursive: bool, want_dirs: bool) -> StorageResult<Vec<StorageFile>> {
        guard(deadline, StorageError::DeadlineExceeded("walk"), async {
        let root = self.resolve(&normalize_dir_path(dir))?;
        let mut out = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(_) if current == root => return Ok(out),
                Err(e) => return Err(StorageError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(StorageError::Io)? {
                if entry.file_name().to_string_lossy().ends_with(SIDECAR_SUFFIX) {
                    continue;
                }
                let meta = entry.metadata().await.map_err(StorageError::Io)?;
                let relative = entry
                    .path()
                    .strip_prefix(&self.config.root)
                    .unwrap_or(&entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                if meta.is_dir() {
                    if want_dirs {
                        out.push(self.stat(&relative, &entry.path()).await?);
                    }
                    if recursive {
                        stack.push(entry.path());
                    }
                } else if !want_dirs {
                    out.push(self.stat(&relative, &entry.path()).await?);
                }
            }
        }
        Ok(out)
        })
        .await
    }
}

#[cfg(unix)]
fn unix_visibility(meta: &std::fs::Metadata) -> Visibility {
    use std::os::unix::fs::PermissionsExt;
    if meta.permissions().mode() & 0o004 != 0 {
        Visibility::Public
    } else {
        Visibility::Private
    }
}

#[cfg(not(unix))]
fn unix_visibility(_meta: &std::fs::Metadata) -> Visibility {
    Visibility::Private
}

#[cfg(unix)]
async fn apply_visibility(path: &Path, visibility: Visibility, is_dir: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = match (visibility, is_dir) {
        (Visibility::Public, true) => 0o755,
        (Visibility::Public, false) => 0o644,
        (Visibility::Private, true) => 0o750,
        (Visibility::Private, false) => 0o640,
    };
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn apply_visibility(_path: &Path, _visibility: Visibility, _is_dir: bool) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl FileStore for LocalDiskDriver {
    async fn get(&self, deadline: &Deadline, path: &str) -> StorageResult<StorageFile> {
        guard(deadline, StorageError::DeadlineExceeded("get"), async {
            let absolute = self.resolve(path)?;
            self.stat(path, &absolute).await
        })
        .await
    }

    async fn exists(&self, deadline: &Deadline, path: &str) -> StorageResult<bool> {
        guard(deadline, StorageError::DeadlineExceeded("exists"), async {
            let absolute = self.resolve(path)?;
            Ok(tokio::fs::metadata(absolute).await.is_ok())
        })
        .await
    }

    async fn read(&self, deadline: &Deadline, path: &str) -> StorageResult<Bytes> {
        guard(deadline, StorageError::DeadlineExceeded("read"), async {
            let absolute = self.resolve(path)?;
            let bytes = tokio::fs::read(&absolute)
                .await
                .map_err(|_| StorageError::FileNotFound(path.to_string()))?;
            Ok(Bytes::from(bytes))
        })
        .await
    }

    /// MIME comes from `opts.mime_type` if set, else is detected from the
    /// filename; both it and `opts.metadata` are persisted to a JSON
    /// sidecar alongside the file, since a plain filesystem has no native
    /// place to keep them.
    async fn write(&self, deadline: &Deadline, path: &str, content: Bytes, opts: WriteOptions) -> StorageResult<StorageFile> {
        guard(deadline, StorageError::DeadlineExceeded("write"), async {
            let absolute = self.resolve(path)?;
            if !opts.overwrite && tokio::fs::metadata(&absolute).await.is_ok() {
                return Err(StorageError::FileAlreadyExists(path.to_string()));
            }
            if let Some(parent) = absolute.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(StorageError::Io)?;
            }
            let mut file = tokio::fs::File::create(&absolute).await.map_err(StorageError::Io)?;
            file.write_all(&content).await.map_err(StorageError::Io)?;
            file.flush().await.map_err(StorageError::Io)?;

            let visibility = opts.visibility.unwrap_or(self.config.default_visibility);
            apply_visibility(&absolute, visibility, false).await.map_err(StorageError::Io)?;

            let mime_type = opts
                .mime_type
                .clone()
                .or_else(|| mime_guess::from_path(path).first().map(|m| m.to_string()));
            Self::write_sidecar(&absolute, &Sidecar { mime_type, metadata: opts.metadata }).await?;

            self.stat(path, &absolute).await
        })
        .await
    }

    async fn delete(&self, deadline: &Deadline, path: &str, strict: bool) -> StorageResult<()> {
        guard(deadline, StorageError::DeadlineExceeded("delete"), async {
            let absolute = self.resolve(path)?;
            match tokio::fs::remove_file(&absolute).await {
                Ok(()) => {
                    let _ = tokio::fs::remove_file(Self::sidecar_path(&absolute)).await;
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if strict {
                        Err(StorageError::FileNotFound(path.to_string()))
                    } else {
                        Ok(())
                    }
                }
                Err(e) => Err(StorageError::Io(e)),
            }
        })
        .await
    }

    async fn create_directory(&self, deadline: &Deadline, path: &str, opts: WriteOptions) -> StorageResult<()> {
        guard(deadline, StorageError::DeadlineExceeded("create_directory"), async {
            let absolute = self.resolve(path)?;
            tokio::fs::create_dir_all(&absolute).await.map_err(StorageError::Io)?;
            let visibility = opts.visibility.unwrap_or(self.config.default_visibility);
            apply_visibility(&absolute, visibility, true).await.map_err(StorageError::Io)?;
            Ok(())
        })
        .await
    }

    async fn delete_directory(&self, deadline: &Deadline, path: &str) -> StorageResult<()> {
        guard(deadline, StorageError::DeadlineExceeded("delete_directory"), async {
            let absolute = self.resolve(path)?;
            match tokio::fs::remove_dir_all(&absolute).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StorageError::Io(e)),
            }
        })
        .await
    }

    async fn files(&self, deadline: &Deadline, dir: &str) -> StorageResult<Vec<StorageFile>> {
        self.walk(deadline, dir, false, false).await
    }

    async fn all_files(&self, deadline: &Deadline, dir: &str) -> StorageResult<Vec<StorageFile>> {
        self.walk(deadline, dir, true, false).await
    }

    async fn directories(&self, deadline: &Deadline, dir: &str) -> StorageResult<Vec<StorageFile>> {
        self.walk(deadline, dir, false, true).await
    }

    async fn all_directories(&self, deadline: &Deadline, dir: &str) -> StorageResult<Vec<StorageFile>> {
        self.walk(deadline, dir, true, true).await
    }

    async fn copy(&self, deadline: &Deadline, source: &str, dest: &str) -> StorageResult<()> {
        guard(deadline, StorageError::DeadlineExceeded("copy"), async {
            let src_abs = self.resolve(source)?;
            let dst_abs = self.resolve(dest)?;
            if let Some(parent) = dst_abs.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(StorageError::Io)?;
            }
            tokio::fs::copy(&src_abs, &dst_abs)
                .await
                .map_err(|_| StorageError::FileNotFound(source.to_string()))?;
            if let Ok(sidecar) = tokio::fs::read(Self::sidecar_path(&src_abs)).await {
                let _ = tokio::fs::write(Self::sidecar_path(&dst_abs), sidecar).await;
            }
            Ok(())
        })
        .await
    }

    async fn size(&self, deadline: &Deadline, path: &str) -> StorageResult<u64> {
        Ok(self.get(deadline, path).await?.size)
    }

    async fn last_modified(&self, deadline: &Deadline, path: &str) -> StorageResult<chrono::DateTime<chrono::Utc>> {
        Ok(self.get(deadline, path).await?.last_modified)
    }

    async fn mime_type(&self, deadline: &Deadline, path: &str) -> StorageResult<Option<String>> {
        Ok(self.get(deadline, path).await?.mime_type)
    }

    async fn visibility(&self, deadline: &Deadline, path: &str) -> StorageResult<Visibility> {
        Ok(self.get(deadline, path).await?.visibility)
    }

    async fn set_visibility(&self, deadline: &Deadline, path: &str, visibility: Visibility) -> StorageResult<()> {
        guard(deadline, StorageError::DeadlineExceeded("set_visibility"), async {
            let absolute = self.resolve(path)?;
            let is_dir = tokio::fs::metadata(&absolute).await.map_err(StorageError::Io)?.is_dir();
            apply_visibility(&absolute, visibility, is_dir).await.map_err(StorageError::Io)
        })
        .await
    }

    async fn checksum(&self, deadline: &Deadline, path: &str, algorithm: &str) -> StorageResult<String> {
        let content = self.read(deadline, path).await?;
        match algorithm.to_ascii_lowercase().as_str() {
            "md5" | "etag" => Ok(format!("{:x}", md5::compute(&content))),
            "sha256" => {
                let mut hasher = sha2::Sha256::new();
                hasher.update(&content);
                Ok(format!("{:x}", hasher.finalize()))
            }
            other => Err(StorageError::Unsupported(other.to_string())),
        }
    }

    async fn url(&self, deadline: &Deadline, path: &str) -> StorageResult<String> {
        let file = self.get(deadline, path).await?;
        if file.visibility.is_public() {
            Ok(self.public_url(path))
        } else {
            self.temporary_url(deadline, path, TemporaryUrlOptions::new(Duration::from_secs(300))).await
        }
    }

    async fn temporary_url(&self, _deadline: &Deadline, path: &str, opts: TemporaryUrlOptions) -> StorageResult<String> {
        let expires_at = (chrono::Utc::now() + chrono::Duration::from_std(opts.expires_in).unwrap_or_default())
            .timestamp();
        Ok(format!("{}?expires={}", self.public_url(path), expires_at))
    }
}

pub struct LocalDiskDriverBuilder {
    config: LocalDriverConfig,
}

impl LocalDiskDriverBuilder {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { config: LocalDriverConfig { root: root.into(), ..Default::default() } }
    }

    pub fn public_url_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.public_url_prefix = Some(prefix.into());
        self
    }

    pub fn default_visibility(mut self, visibility: Visibility) -> Self {
        self.config.default_visibility = visibility;
        self
    }

    pub fn build(self) -> LocalDiskDriver {
        LocalDiskDriver::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("unicache-test-{}", fastrand::u64(..)));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn write_then_read_round_trips_content() {
        let root = temp_root();
        let driver = LocalDiskDriverBuilder::new(&root).build();
        driver.write(&Deadline::none(), "a.txt", Bytes::from_static(b"one"), WriteOptions::new()).await.unwrap();
        assert_eq!(driver.read(&Deadline::none(), "a.txt").await.unwrap(), Bytes::from_static(b"one"));
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn overwrite_guard_rejects_second_write_and_preserves_original() {
        let root = temp_root();
        let driver = LocalDiskDriverBuilder::new(&root).build();
        driver.write(&Deadline::none(), "a.txt", Bytes::from_static(b"one"), WriteOptions::new()).await.unwrap();
        let result = driver
            .write(&Deadline::none(), "a.txt", Bytes::from_static(b"two"), WriteOptions::new().overwrite(false))
            .await;
        assert!(matches!(result, Err(StorageError::FileAlreadyExists(_))));
        assert_eq!(driver.read(&Deadline::none(), "a.txt").await.unwrap(), Bytes::from_static(b"one"));
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn path_escape_attempts_are_refused() {
        let root = temp_root();
        let driver = LocalDiskDriverBuilder::new(&root).build();
        let result = driver.write(&Deadline::none(), "../escape.txt", Bytes::from_static(b"x"), WriteOptions::new()).await;
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn delete_is_idempotent_by_default_but_strict_mode_reports_missing() {
        let root = temp_root();
        let driver = LocalDiskDriverBuilder::new(&root).build();
        assert!(driver.delete(&Deadline::none(), "missing.txt", false).await.is_ok());
        assert!(matches!(driver.delete(&Deadline::none(), "missing.txt", true).await, Err(StorageError::FileNotFound(_))));
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn move_is_copy_then_delete_source() {
        let root = temp_root();
        let driver = LocalDiskDriverBuilder::new(&root).build();
        driver.write(&Deadline::none(), "a.txt", Bytes::from_static(b"content"), WriteOptions::new()).await.unwrap();
        driver.mv(&Deadline::none(), "a.txt", "b.txt").await.unwrap();
        assert!(!driver.exists(&Deadline::none(), "a.txt").await.unwrap());
        assert!(driver.exists(&Deadline::none(), "b.txt").await.unwrap());
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn write_honors_explicit_mime_type_and_persists_metadata() {
        let root = temp_root();
        let driver = LocalDiskDriverBuilder::new(&root).build();
        let mut metadata = HashMap::new();
        metadata.insert("owner".to_string(), "alice".to_string());
        let opts = WriteOptions::new().with_mime_type("application/x-custom").with_metadata(metadata.clone());
        driver.write(&Deadline::none(), "a.json", Bytes::from_static(b"{}"), opts).await.unwrap();

        let file = driver.get(&Deadline::none(), "a.json").await.unwrap();
        assert_eq!(file.mime_type.as_deref(), Some("application/x-custom"));
        assert_eq!(file.metadata, metadata);
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn create_then_delete_directory_round_trips() {
        let root = temp_root();
        let driver = LocalDiskDriverBuilder::new(&root).build();
        driver.create_directory(&Deadline::none(), "sub/dir", WriteOptions::new()).await.unwrap();
        driver.write(&Deadline::none(), "sub/dir/file.txt", Bytes::from_static(b"x"), WriteOptions::new()).await.unwrap();
        assert_eq!(driver.all_files(&Deadline::none(), "sub").await.unwrap().len(), 1);
        driver.delete_directory(&Deadline::none(), "sub").await.unwrap();
        assert!(driver.all_files(&Deadline::none(), "sub").await.unwrap().is_empty());
        std::fs::remove_dir_all(root).ok();
    }
}
