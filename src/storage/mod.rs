//! File-object storage subsystem: the file/filesystem contract, local
//! and object-store drivers, and the manager + uploader pipeline that
//! sits on top of them.

pub mod client;
pub mod contract;
pub mod file;
pub mod local;
pub mod manager;
pub mod object_store;
pub mod registry;
pub mod uploader;

pub use client::{DiskStats, StorageClient};
pub use contract::FileStore;
pub use file::{
    ChecksumAlgorithm, StorageFile, TemporaryUrlOptions, UploadedFile, Visibility, WriteOptions,
};
pub use local::{LocalDiskDriver, LocalDiskDriverBuilder, LocalDriverConfig};
pub use manager::{SharedFileStore, StorageManager};
pub use object_store::cos::{CosDriver, CosDriverBuilder, CosDriverConfig};
pub use object_store::oss::{OssDriver, OssDriverBuilder, OssDriverConfig};
pub use object_store::s3::{S3Driver, S3DriverBuilder, S3DriverConfig};
pub use registry::{builtin_registry as builtin_storage_registry, StorageDriverRegistry};
pub use uploader::{
    document_validator, image_validator, pdf_validator, Namer, UploadHook, Uploader, UploaderConfig,
    Validator,
};
