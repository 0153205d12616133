//! The value types shared by every file-storage driver: `StorageFile`,
//! `WriteOptions`, and the `UploadedFile` record produced by the upload
//! pipeline.

use std::collections::HashMap;
use std::time::Duration;

/// `public` (world-readable) vs. `private` (access-controlled), exposed
/// uniformly across every filesystem driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

impl Visibility {
    pub fn is_public(self) -> bool {
        matches!(self, Visibility::Public)
    }
}

/// The file unit returned by `Get`/`Files`/`AllFiles`. `path` is the
/// canonical storage key; directories are either real filesystem
/// directories (local driver) or synthesized prefixes (object-store
/// drivers, marker object ending in `/`).
#[derive(Debug, Clone)]
pub struct StorageFile {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub last_modified: chrono::DateTime<chrono::Utc>,
    pub mime_type: Option<String>,
    pub visibility: Visibility,
    pub is_directory: bool,
    pub metadata: HashMap<String, String>,
}

impl StorageFile {
    pub fn extension(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(_, ext)| ext)
    }
}

/// Configuration bag for write operations. Unset fields take driver
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub visibility: Option<Visibility>,
    pub overwrite: bool,
    pub mime_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_mime_type<S: Into<String>>(mut self, mime_type: S) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Recognized checksum algorithms. Object-store drivers only expose an
/// ETag, usually MD5 for single-part uploads, so they accept a narrower
/// set than the local driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
    Etag,
}

impl ChecksumAlgorithm {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Some(ChecksumAlgorithm::Md5),
            "sha256" => Some(ChecksumAlgorithm::Sha256),
            "etag" => Some(ChecksumAlgorithm::Etag),
            _ => None,
        }
    }
}

/// Transient record produced by the upload pipeline.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub saved_name: String,
    pub size: u64,
    pub mime_type: String,
    pub extension: Option<String>,
    pub path: String,
    pub url: Option<String>,
    pub metadata: HashMap<String, String>,
    pub checksum: String,
}

/// Options recognized by `temporary_url`. A zero `expires_in` is
/// driver-documented behavior — this driver returns an already-expired
/// URL rather than an error.
#[derive(Debug, Clone, Copy)]
pub struct TemporaryUrlOptions {
    pub expires_in: Duration,
}

impl TemporaryUrlOptions {
    pub fn new(expires_in: Duration) -> Self {
        Self { expires_in }
    }
}

/// Normalizes a caller-supplied path: strips leading slashes, replaces
/// backslashes with forward slashes. Does NOT perform root-escape checks
/// — that's the local driver's job, since object-store drivers have no
/// filesystem root to escape.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

/// Forces a directory path to end with `/`, since directory paths for
/// listing must terminate with `/` before being passed to backend
/// APIs.
pub fn normalize_dir_path(path: &str) -> String {
    let normalized = normalize_path(path);
    if normalized.is_empty() || normalized.ends_with('/') {
        normalized
    } else {
        format!("{}/", normalized)
    }
}

pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_strips_leading_slash_and_fixes_backslashes() {
        assert_eq!(normalize_path("/a/b"), "a/b");
        assert_eq!(normalize_path("a\\b\\c"), "a/b/c");
        assert_eq!(normalize_path("//a//b"), "a//b");
    }

    #[test]
    fn normalize_dir_path_always_ends_with_slash() {
        assert_eq!(normalize_dir_path("a/b"), "a/b/");
        assert_eq!(normalize_dir_path("a/b/"), "a/b/");
        assert_eq!(normalize_dir_path(""), "");
    }

    #[test]
    fn file_name_extracts_final_segment() {
        assert_eq!(file_name("a/b/c.txt"), "c.txt");
        assert_eq!(file_name("a/b/dir/"), "dir");
        assert_eq!(file_name("c.txt"), "c.txt");
    }
}
