//! Unified cache and file-storage abstraction layer with pluggable
//! drivers: a single `Driver / Store / Manager` architecture shared by
//! an in-process/external key-value cache and a local/object-store file
//! layer, so application code depends on two narrow traits instead of a
//! Redis client here and an S3 SDK there.

pub mod cache;
pub mod config;
pub mod deadline;
pub mod error;
pub mod registry;
pub mod storage;

pub use cache::{
    CacheClient, CacheDriverRegistry, CacheManager, CacheStats, CacheStore, CacheValue,
    GetOrSetOptions, SetOptions,
};
pub use config::{ConfigMap, ConfigMapExt, ConfigValue};
pub use deadline::Deadline;
pub use error::{CacheError, CacheResult, Error, Result, StorageError, StorageResult};
pub use storage::{DiskStats, FileStore, StorageClient, StorageDriverRegistry, StorageManager, Visibility};
