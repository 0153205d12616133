//! Object-Store Drivers (C9): File/FS Contract implementations over
//! remote, S3-style object stores. `s3`, `oss`, and `cos`
//! each speak a different signing scheme but the same delimiter-`/`
//! listing API shape, so the XML response model and pagination helper
//! live here and are shared by all three.

pub mod cos;
pub mod oss;
pub mod s3;
pub mod signing;

use serde::Deserialize;

use crate::error::StorageError;

pub const LIST_PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    #[serde(default, rename = "Contents")]
    pub contents: Vec<ObjectEntry>,
    #[serde(default, rename = "CommonPrefixes")]
    pub common_prefixes: Vec<CommonPrefix>,
    #[serde(default, rename = "IsTruncated")]
    pub is_truncated: bool,
    #[serde(default, rename = "NextContinuationToken")]
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectEntry {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Size", default)]
    pub size: u64,
    #[serde(rename = "LastModified", default)]
    pub last_modified: Option<String>,
    #[serde(rename = "ETag", default)]
    pub etag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommonPrefix {
    #[serde(rename = "Prefix")]
    pub prefix: String,
}

pub fn parse_list_response(body: &str) -> Result<ListBucketResult, StorageError> {
    quick_xml::de::from_str(body)
        .map_err(|e| StorageError::Backend { op: "list", path: None, source: anyhow::Error::new(e) })
}

pub fn parse_last_modified(raw: &Option<String>) -> chrono::DateTime<chrono::Utc> {
    raw.as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(chrono::Utc::now)
}

pub fn map_status(status: reqwest::StatusCode, op: &'static str, path: &str) -> StorageError {
    match status.as_u16() {
        404 => StorageError::FileNotFound(path.to_string()),
        403 => StorageError::PermissionDenied(path.to_string()),
        409 if op == "write" => StorageError::FileAlreadyExists(path.to_string()),
        _ => StorageError::Backend {
            op,
            path: Some(path.to_string()),
            source: anyhow::anyhow!("unexpected status {}", status),
        },
    }
}
