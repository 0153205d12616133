//! S3-compatible object-store driver. Works against AWS S3
//! and any endpoint speaking the same REST API (MinIO, etc).

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

use super::signing::{sha256_hex, SigV4};
use super::{map_status, parse_last_modified, parse_list_response, LIST_PAGE_SIZE};
use crate::deadline::{guard, Deadline};
use crate::storage::contract::FileStore;
use crate::storage::file::{
    file_name, normalize_dir_path, normalize_path, StorageFile, TemporaryUrlOptions, Visibility,
    WriteOptions,
};
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct S3DriverConfig {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub use_ssl: bool,
    pub force_path_style: bool,
    pub public_url: Option<String>,
    pub default_visibility: Visibility,
}

pub struct S3Driver {
    client: Client,
    config: S3DriverConfig,
}

impl S3Driver {
    pub fn new(config: S3DriverConfig) -> StorageResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| StorageError::Backend { op: "connect", path: None, source: anyhow::Error::new(e) })?;
        Ok(Self { client, config })
    }

    fn scheme(&self) -> &'static str {
        if self.config.use_ssl {
            "https"
        } else {
            "http"
        }
    }

    fn host(&self) -> String {
        let endpoint = self.config.endpoint.trim_start_matches("https://").trim_start_matches("http://");
        if self.config.force_path_style {
            endpoint.to_string()
        } else {
            format!("{}.{}", self.config.bucket, endpoint)
        }
    }

    fn canonical_uri(&self, key: &str) -> String {
        if self.config.force_path_style {
            format!("/{}/{}", self.config.bucket, key)
        } else {
            format!("/{}", key)
        }
    }

    fn object_url(&self, key: &str, query: &str) -> String {
        let uri = self.canonical_uri(key);
        if query.is_empty() {
            format!("{}://{}{}", self.scheme(), self.host(), uri)
        } else {
            format!("{}://{}{}?{}", self.scheme(), self.host(), uri, query)
        }
    }

    fn signer(&self) -> SigV4<'_> {
        SigV4 {
            access_key: &self.config.access_key,
            secret_key: &self.config.secret_key,
            region: &self.config.region,
            service: "s3",
        }
    }

    fn now_amz_date(&self) -> String {
        chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
    }

    async fn signed_request(
        &self,
        deadline: &Deadline,
        method: reqwest::Method,
        key: &str,
        query: &str,
        body: Bytes,
        extra_headers: &[(String, String)],
    ) -> StorageResult<reqwest::Response> {
        let amz_date = self.now_amz_date();
        let payload_hash = sha256_hex(&body);
        let host = self.host();
        let uri = self.canonical_uri(key);
        let authorization =
            self.signer().sign_header(method.as_str(), &uri, query, &host, &payload_hash, &amz_date);

        let mut request = self
            .client
            .request(method, self.object_url(key, query))
            .header("Host", host)
            .header("x-amz-date", &amz_date)
            .header("x-amz-content-sha256", &payload_hash)
            .header("Authorization", authorization)
            .body(body);
        for (name, value) in extra_headers {
            request = request.header(name, value);
        }
        guard(deadline, StorageError::DeadlineExceeded("request"), async {
            request
                .send()
                .await
                .map_err(|e| StorageError::Backend { op: "request", path: Some(key.to_string()), source: anyhow::Error::new(e) })
        })
        .await
    }

    async fn list(
        &self,
        deadline: &Deadline,
        prefix: &str,
        delimiter: Option<&str>,
        token: Option<&str>,
    ) -> StorageResult<super::ListBucketResult> {
        let mut query = format!("list-type=2&prefix={}&max-keys={}", urlencode(prefix), LIST_PAGE_SIZE);
        if let Some(d) = delimiter {
            query.push_str(&format!("&delimiter={}", urlencode(d)));
        }
        if let Some(t) = token {
            query.push_str(&format!("&continuation-token={}", urlencode(t)));
        }
        let response = self.signed_request(deadline, reqwest::Method::GET, "", &query, Bytes::new(), &[]).await?;
        if !response.status().is_success() {
            return Err(map_status(response.status(), "list", prefix));
        }
        let body = guard(deadline, StorageError::DeadlineExceeded("list"), async {
            response.text().await.map_err(|e| StorageError::Backend { op: "list", path: None, source: anyhow::Error::new(e) })
        })
        .await?;
        parse_list_response(&body)
    }

    fn entry_to_file(&self, path: String, size: u64, last_modified: chrono::DateTime<chrono::Utc>, is_directory: bool) -> StorageFile {
        StorageFile {
            name: file_name(&path).to_string(),
            mime_type: if is_directory { None } else { mime_guess::from_path(&path).first().map(|m| m.to_string()) },
            visibility: self.config.default_visibility,
            is_directory,
            metadata: Default::default(),
            last_modified,
            size,
            path,
        }
    }
}

fn urlencode(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s, percent_encoding::NON_ALPHANUMERIC).to_string()
}

#[async_trait]
impl FileStore for S3Driver {
    async fn get(&self, deadline: &Deadline, path: &str) -> StorageResult<StorageFile> {
        let key = normalize_path(path);
        let response = self.signed_request(deadline, reqwest::Method::HEAD, &key, "", Bytes::new(), &[]).await?;
        if !response.status().is_success() {
            return Err(map_status(response.status(), "get", path));
        }
        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| chrono::DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);
        let visibility = if response.headers().contains_key("x-amz-acl-public") {
            Visibility::Public
        } else {
            self.config.default_visibility
        };
        let metadata = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let name = name.as_str();
                name.strip_prefix("x-amz-meta-").map(|k| (k.to_string(), value.to_str().unwrap_or("").to_string()))
            })
            .collect();
        Ok(StorageFile {
            path: key.clone(),
            name: file_name(&key).to_string(),
            size,
            last_modified,
            mime_type: response.headers().get(reqwest::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(String::from),
            visibility,
            is_directory: key.ends_with('/'),
            metadata,
        })
    }

    async fn exists(&self, deadline: &Deadline, path: &str) -> StorageResult<bool> {
        match self.get(deadline, path).await {
            Ok(_) => Ok(true),
            Err(StorageError::FileNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn read(&self, deadline: &Deadline, path: &str) -> StorageResult<Bytes> {
        let key = normalize_path(path);
        let response = self.signed_request(deadline, reqwest::Method::GET, &key, "", Bytes::new(), &[]).await?;
        if !response.status().is_success() {
            return Err(map_status(response.status(), "read", path));
        }
        guard(deadline, StorageError::DeadlineExceeded("read"), async {
            response
                .bytes()
                .await
                .map_err(|e| StorageError::Backend { op: "read", path: Some(path.to_string()), source: anyhow::Error::new(e) })
        })
        .await
    }

    async fn write(&self, deadline: &Deadline, path: &str, content: Bytes, opts: WriteOptions) -> StorageResult<StorageFile> {
        let key = normalize_path(path);
        if !opts.overwrite && self.exists(deadline, &key).await? {
            return Err(StorageError::FileAlreadyExists(path.to_string()));
        }
        let mime_type = opts
            .mime_type
            .clone()
            .or_else(|| mime_guess::from_path(&key).first().map(|m| m.to_string()))
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let visibility = opts.visibility.unwrap_or(self.config.default_visibility);
        let acl = if visibility.is_public() { "public-read" } else { "private" };
        let mut headers = vec![("Content-Type".to_string(), mime_type), ("x-amz-acl".to_string(), acl.to_string())];
        for (name, value) in &opts.metadata {
            headers.push((format!("x-amz-meta-{}", name), value.clone()));
        }
        let response = self.signed_request(deadline, reqwest::Method::PUT, &key, "", content.clone(), &headers).await?;
        if !response.status().is_success() {
            return Err(map_status(response.status(), "write", path));
        }
        Ok(StorageFile {
            path: key.clone(),
            name: file_name(&key).to_string(),
            size: content.len() as u64,
            last_modified: chrono::Utc::now(),
            mime_type: Some(headers[0].1.clone()),
            visibility,
            is_directory: false,
            metadata: opts.metadata,
        })
    }

    async fn delete(&self, deadline: &Deadline, path: &str, strict: bool) -> StorageResult<()> {
        let key = normalize_path(path);
        let response = self.signed_request(deadline, reqwest::Method::DELETE, &key, "", Bytes::new(), &[]).await?;
        if response.status().is_success() || response.status().as_u16() == 404 {
            if strict && response.status().as_u16() == 404 {
                return Err(StorageError::FileNotFound(path.to_string()));
            }
            Ok(())
        } else {
            Err(map_status(response.status(), "delete", path))
        }
    }

    async fn create_directory(&self, deadline: &Deadline, path: &str, opts: WriteOptions) -> StorageResult<()> {
        let dir = normalize_dir_path(path);
        self.write(deadline, &dir, Bytes::new(), opts).await.map(|_| ())
    }

    async fn delete_directory(&self, deadline: &Deadline, path: &str) -> StorageResult<()> {
        let prefix = normalize_dir_path(path);
        let mut token: Option<String> = None;
        loop {
            let page = self.list(deadline, &prefix, None, token.as_deref()).await?;
            for entry in &page.contents {
                self.delete(deadline, &entry.key, false).await?;
            }
            if page.is_truncated {
                token = page.next_continuation_token;
            } else {
                break;
            }
        }
        Ok(())
    }

    async fn files(&self, deadline: &Deadline, dir: &str) -> StorageResult<Vec<StorageFile>> {
        let prefix = normalize_dir_path(dir);
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list(deadline, &prefix, Some("/"), token.as_deref()).await?;
            for entry in page.contents {
                if entry.key == prefix {
                    continue;
                }
                out.push(self.entry_to_file(entry.key.clone(), entry.size, parse_last_modified(&entry.last_modified), false));
            }
            if page.is_truncated {
                token = page.next_continuation_token;
            } else {
                break;
            }
        }
        Ok(out)
    }

    async fn all_files(&self, deadline: &Deadline, dir: &str) -> StorageResult<Vec<StorageFile>> {
        let prefix = normalize_dir_path(dir);
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list(deadline, &prefix, None, token.as_deref()).await?;
            for entry in page.contents {
                if entry.key.ends_with('/') {
                    continue;
                }
                out.push(self.entry_to_file(entry.key.clone(), entry.size, parse_last_modified(&entry.last_modified), false));
            }
            if page.is_truncated {
                token = page.next_continuation_token;
            } else {
                break;
            }
        }
        Ok(out)
    }

    async fn directories(&self, deadline: &Deadline, dir: &str) -> StorageResult<Vec<StorageFile>> {
        let prefix = normalize_dir_path(dir);
        let page = self.list(deadline, &prefix, Some("/"), None).await?;
        Ok(page
            .common_prefixes
            .into_iter()
            .map(|cp| self.entry_to_file(cp.prefix, 0, chrono::Utc::now(), true))
            .collect())
    }

    async fn all_directories(&self, deadline: &Deadline, dir: &str) -> StorageResult<Vec<StorageFile>> {
        let prefix = normalize_dir_path(dir);
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list(deadline, &prefix, None, token.as_deref()).await?;
            for entry in page.contents {
                if entry.key.ends_with('/') {
                    out.push(self.entry_to_file(entry.key.clone(), 0, parse_last_modified(&entry.last_modified), true));
                }
            }
            if page.is_truncated {
                token = page.next_continuation_token;
            } else {
                break;
            }
        }
        Ok(out)
    }

    async fn copy(&self, deadline: &Deadline, source: &str, dest: &str) -> StorageResult<()> {
        let src_key = normalize_path(source);
        let dst_key = normalize_path(dest);
        let copy_source = format!("/{}/{}", self.config.bucket, src_key);
        let headers = [("x-amz-copy-source".to_string(), copy_source)];
        let response = self.signed_request(deadline, reqwest::Method::PUT, &dst_key, "", Bytes::new(), &headers).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(map_status(response.status(), "copy", source))
        }
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
        let key = normalize_path(path);
        let acl = if visibility.is_public() { "public-read" } else { "private" };
        let headers = [("x-amz-acl", acl.to_string())];
        let response = self
            .signed_request(deadline, reqwest::Method::PUT, &key, "acl", Bytes::new(), &headers)
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(map_status(response.status(), "set_visibility", path))
        }
    }

    async fn checksum(&self, deadline: &Deadline, path: &str, algorithm: &str) -> StorageResult<String> {
        match algorithm.to_ascii_lowercase().as_str() {
            "md5" | "etag" => {
                let key = normalize_path(path);
                let response = self.signed_request(deadline, reqwest::Method::HEAD, &key, "", Bytes::new(), &[]).await?;
                response
                    .headers()
                    .get(reqwest::header::ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.trim_matches('"').to_string())
                    .ok_or_else(|| StorageError::FileNotFound(path.to_string()))
            }
            other => Err(StorageError::Unsupported(other.to_string())),
        }
    }

    async fn url(&self, _deadline: &Deadline, path: &str) -> StorageResult<String> {
        let key = normalize_path(path);
        if let Some(public_url) = &self.config.public_url {
            return Ok(format!("{}/{}", public_url.trim_end_matches('/'), key));
        }
        Ok(self.object_url(&key, ""))
    }

    async fn temporary_url(&self, _deadline: &Deadline, path: &str, opts: TemporaryUrlOptions) -> StorageResult<String> {
        let key = normalize_path(path);
        let amz_date = self.now_amz_date();
        let host = self.host();
        let uri = self.canonical_uri(&key);
        let query = self.signer().presign_query("GET", &uri, &host, &amz_date, opts.expires_in.as_secs());
        Ok(format!("{}://{}{}?{}", self.scheme(), host, uri, query))
    }
}

pub struct S3DriverBuilder {
    config: S3DriverConfig,
}

impl S3DriverBuilder {
    pub fn new<S: Into<String>>(endpoint: S, bucket: S) -> Self {
        Self {
            config: S3DriverConfig {
                endpoint: endpoint.into(),
                region: "us-east-1".to_string(),
                bucket: bucket.into(),
                access_key: String::new(),
                secret_key: String::new(),
                use_ssl: true,
                force_path_style: false,
                public_url: None,
                default_visibility: Visibility::Private,
            },
        }
    }

    pub fn credentials<S: Into<String>>(mut self, access_key: S, secret_key: S) -> Self {
        self.config.access_key = access_key.into();
        self.config.secret_key = secret_key.into();
        self
    }

    pub fn region<S: Into<String>>(mut self, region: S) -> Self {
        self.config.region = region.into();
        self
    }

    pub fn use_ssl(mut self, use_ssl: bool) -> Self {
        self.config.use_ssl = use_ssl;
        self
    }

    pub fn force_path_style(mut self, force: bool) -> Self {
        self.config.force_path_style = force;
        self
    }

    pub fn public_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.public_url = Some(url.into());
        self
    }

    pub fn default_visibility(mut self, visibility: Visibility) -> Self {
        self.config.default_visibility = visibility;
        self
    }

    pub fn build(self) -> StorageResult<S3Driver> {
        S3Driver::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_uri_respects_path_style_flag() {
        let driver = S3DriverBuilder::new("s3.amazonaws.com".to_string(), "my-bucket".to_string())
            .force_path_style(true)
            .build()
            .unwrap();
        assert_eq!(driver.canonical_uri("a/b.txt"), "/my-bucket/a/b.txt");

        let driver = S3DriverBuilder::new("s3.amazonaws.com".to_string(), "my-bucket".to_string())
            .force_path_style(false)
            .build()
            .unwrap();
        assert_eq!(driver.canonical_uri("a/b.txt"), "/a/b.txt");
    }

    #[tokio::test]
    #[ignore = "requires a live S3-compatible endpoint"]
    async fn round_trips_against_a_live_bucket() {
        let driver = S3DriverBuilder::new("s3.amazonaws.com".to_string(), "test-bucket".to_string())
            .credentials("AKIA".to_string(), "secret".to_string())
            .build()
            .unwrap();
        driver
            .write(&Deadline::none(), "probe.txt", Bytes::from_static(b"hello"), WriteOptions::new().overwrite(true))
            .await
            .unwrap();
        assert_eq!(driver.read(&Deadline::none(), "probe.txt").await.unwrap(), Bytes::from_static(b"hello"));
        driver.delete(&Deadline::none(), "probe.txt", false).await.unwrap();
    }
}
