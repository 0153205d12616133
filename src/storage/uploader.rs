//! Uploader (C10, pipeline half): validate → name → write → checksum →
//! post-hooks, with compensating rollback on post-hook failure (spec
//! §4.10).

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use super::contract::FileStore;
use super::file::{UploadedFile, Visibility, WriteOptions};
use crate::deadline::Deadline;
use crate::error::{StorageError, StorageResult};

pub type Validator = Arc<dyn Fn(&UploadedFile, &Bytes) -> StorageResult<()> + Send + Sync>;
pub type UploadHook = Arc<dyn Fn(&UploadedFile) -> StorageResult<()> + Send + Sync>;
pub type Namer = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Clone)]
pub struct UploaderConfig {
    pub directory_prefix: String,
    pub allowed_mime_types: Vec<String>,
    pub max_size_bytes: Option<u64>,
    pub visibility: Visibility,
    pub overwrite: bool,
    pub unique_name: bool,
    pub default_metadata: HashMap<String, String>,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            directory_prefix: String::new(),
            allowed_mime_types: Vec::new(),
            max_size_bytes: None,
            visibility: Visibility::Private,
            overwrite: false,
            unique_name: true,
            default_metadata: HashMap::new(),
        }
    }
}

/// A configurable, disk-agnostic upload pipeline: runs validators and
/// before/after hooks around a single `FileStore::write` call, rolling
/// back the written file if any after-upload hook fails.
#[derive(Clone)]
pub struct Uploader {
    disk: Arc<dyn FileStore>,
    config: UploaderConfig,
    validators: Vec<Validator>,
    before_hooks: Vec<UploadHook>,
    after_hooks: Vec<UploadHook>,
    namer: Option<Namer>,
}

impl Uploader {
    pub fn new(disk: Arc<dyn FileStore>, config: UploaderConfig) -> Self {
        Self { disk, config, validators: Vec::new(), before_hooks: Vec::new(), after_hooks: Vec::new(), namer: None }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn with_before_hook(mut self, hook: UploadHook) -> Self {
        self.before_hooks.push(hook);
        self
    }

    pub fn with_after_hook(mut self, hook: UploadHook) -> Self {
        self.after_hooks.push(hook);
        self
    }

    pub fn with_namer(mut self, namer: Namer) -> Self {
        self.namer = Some(namer);
        self
    }

    /// Runs the full pipeline: build `UploadedFile`, validate, name,
    /// write, checksum, compute URL, run after-hooks (rolling back the
    /// write if any fails).
    pub async fn upload(
        &self,
        deadline: &Deadline,
        original_name: &str,
        content: Bytes,
        mime_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> StorageResult<UploadedFile> {
        let detected_mime = mime_type
            .or_else(|| mime_guess::from_path(original_name).first().map(|m| m.to_string()))
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let extension = original_name.rsplit_once('.').map(|(_, ext)| ext.to_string());

        let mut combined_metadata = self.config.default_metadata.clone();
        combined_metadata.extend(metadata);

        let mut file = UploadedFile {
            original_name: original_name.to_string(),
            saved_name: original_name.to_string(),
            size: content.len() as u64,
            mime_type: detected_mime.clone(),
            extension,
            path: String::new(),
            url: None,
            metadata: combined_metadata,
            checksum: String::new(),
        };

        if let Some(max) = self.config.max_size_bytes {
            if file.size > max {
                return Err(StorageError::UploadRejected(format!("file size {} exceeds maximum {}", file.size, max)));
            }
        }
        if !self.config.allowed_mime_types.is_empty() && !mime_type_allowed(&self.config.allowed_mime_types, &detected_mime) {
            return Err(StorageError::UploadRejected(format!("mime type {} is not allowed", detected_mime)));
        }

        for validator in &self.validators {
            validator(&file, &content)?;
        }
        for hook in &self.before_hooks {
            hook(&file)?;
        }

        file.saved_name = self.generate_name(original_name);
        let path = if self.config.directory_prefix.is_empty() {
            file.saved_name.clone()
        } else {
            format!("{}/{}", self.config.directory_prefix.trim_end_matches('/'), file.saved_name)
        };
        file.path = path.clone();

        let opts = WriteOptions::new()
            .with_visibility(self.config.visibility)
            .overwrite(self.config.overwrite)
            .with_mime_type(detected_mime)
            .with_metadata(file.metadata.clone());
        self.disk.write(deadline, &path, content.clone(), opts).await?;

        file.checksum = format!("{:x}", md5::compute(&content));
        file.url = self.disk.url(deadline, &path).await.ok();

        for hook in &self.after_hooks {
            if let Err(hook_err) = hook(&file) {
                if let Err(rollback_err) = self.disk.delete(deadline, &path, false).await {
                    return Err(StorageError::Backend {
                        op: "upload_rollback",
                        path: Some(path),
                        source: anyhow::anyhow!("post-hook failed ({}) and rollback delete also failed ({})", hook_err, rollback_err),
                    });
                }
                return Err(hook_err);
            }
        }

        Ok(file)
    }

    fn generate_name(&self, original_name: &str) -> String {
        if let Some(namer) = &self.namer {
            return namer(original_name);
        }
        if self.config.unique_name {
            let millis = chrono::Utc::now().timestamp_millis();
            match original_name.rsplit_once('.') {
                Some((stem, ext)) => format!("{}-{}.{}", stem, millis, ext),
                None => format!("{}-{}", original_name, millis),
            }
        } else {
            original_name.to_string()
        }
    }
}

fn mime_type_allowed(allowed: &[String], mime_type: &str) -> bool {
    allowed.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix("/*") {
            mime_type.starts_with(prefix) && mime_type[prefix.len()..].starts_with('/')
        } else {
            pattern == mime_type
        }
    })
}

/// Validator builtins named by capability: image, PDF, document
/// (DOC/DOCX/XLS/XLSX/PPT/PPTX/TXT/PDF/RTF).
pub fn image_validator() -> Validator {
    Arc::new(|file: &UploadedFile, _content: &Bytes| {
        if file.mime_type.starts_with("image/") {
            Ok(())
        } else {
            Err(StorageError::UploadRejected(format!("{} is not an image", file.mime_type)))
        }
    })
}

pub fn pdf_validator() -> Validator {
    Arc::new(|file: &UploadedFile, _content: &Bytes| {
        if file.mime_type == "application/pdf" {
            Ok(())
        } else {
            Err(StorageError::UploadRejected(format!("{} is not a PDF", file.mime_type)))
        }
    })
}

pub fn document_validator() -> Validator {
    const ALLOWED: &[&str] = &[
        "application/msword",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "application/vnd.ms-excel",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "application/vnd.ms-powerpoint",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "text/plain",
        "application/pdf",
        "application/rtf",
    ];
    Arc::new(|file: &UploadedFile, _content: &Bytes| {
        if ALLOWED.contains(&file.mime_type.as_str()) {
            Ok(())
        } else {
            Err(StorageError::UploadRejected(format!("{} is not a recognized document type", file.mime_type)))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalDiskDriverBuilder;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn temp_root() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("unicache-uploader-test-{}", fastrand::u64(..)));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn successful_upload_writes_file_and_computes_checksum() {
        let root = temp_root();
        let disk = Arc::new(LocalDiskDriverBuilder::new(&root).build());
        let uploader = Uploader::new(disk.clone(), UploaderConfig { unique_name: false, ..Default::default() });

        let result = uploader.upload(&Deadline::none(), "photo.png", Bytes::from_static(b"pngdata"), None, HashMap::new()).await.unwrap();
        assert_eq!(result.path, "photo.png");
        assert!(!result.checksum.is_empty());
        assert!(disk.exists(&Deadline::none(), "photo.png").await.unwrap());
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_before_any_write() {
        let root = temp_root();
        let disk = Arc::new(LocalDiskDriverBuilder::new(&root).build());
        let uploader = Uploader::new(disk.clone(), UploaderConfig { max_size_bytes: Some(2), unique_name: false, ..Default::default() });

        let result = uploader.upload(&Deadline::none(), "big.txt", Bytes::from_static(b"too big"), None, HashMap::new()).await;
        assert!(matches!(result, Err(StorageError::UploadRejected(_))));
        assert!(!disk.exists(&Deadline::none(), "big.txt").await.unwrap());
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn failing_after_hook_rolls_back_the_write() {
        let root = temp_root();
        let disk = Arc::new(LocalDiskDriverBuilder::new(&root).build());
        let uploader = Uploader::new(disk.clone(), UploaderConfig { unique_name: false, ..Default::default() })
            .with_after_hook(Arc::new(|_file| Err(StorageError::UploadRejected("post-processing failed".into()))));

        let result = uploader.upload(&Deadline::none(), "doc.txt", Bytes::from_static(b"0123456789"), None, HashMap::new()).await;
        assert!(result.is_err());
        assert!(!disk.exists(&Deadline::none(), "doc.txt").await.unwrap());
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn unique_name_appends_timestamp_before_extension() {
        let root = temp_root();
        let disk = Arc::new(LocalDiskDriverBuilder::new(&root).build());
        let uploader = Uploader::new(disk.clone(), UploaderConfig { unique_name: true, ..Default::default() });

        let result = uploader.upload(&Deadline::none(), "report.pdf", Bytes::from_static(b"x"), None, HashMap::new()).await.unwrap();
        assert_ne!(result.saved_name, "report.pdf");
        assert!(result.saved_name.ends_with(".pdf"));
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn before_hook_runs_before_write_and_can_abort() {
        let root = temp_root();
        let disk = Arc::new(LocalDiskDriverBuilder::new(&root).build());
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        let uploader = Uploader::new(disk.clone(), UploaderConfig { unique_name: false, ..Default::default() })
            .with_before_hook(Arc::new(move |_file| {
                called_clone.store(true, Ordering::SeqCst);
                Err(StorageError::UploadRejected("rejected before write".into()))
            }));

        let result = uploader.upload(&Deadline::none(), "x.txt", Bytes::from_static(b"x"), None, HashMap::new()).await;
        assert!(result.is_err());
        assert!(called.load(Ordering::SeqCst));
        assert!(!disk.exists(&Deadline::none(), "x.txt").await.unwrap());
        std::fs::remove_dir_all(root).ok();
    }
}
