use thiserror::Error;

/// Errors surfaced by the cache subsystem (C2-C6).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("unknown cache driver: {0}")]
    UnknownDriver(String),

    #[error("invalid cache driver configuration: {0}")]
    InvalidConfiguration(String),

    #[error("cache key not found or expired: {0}")]
    CacheMiss(String),

    #[error("value for key {key} is not a valid numeric counter: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    #[error("no cache store registered under name: {0}")]
    UnknownStore(String),

    #[error("cache operation timed out")]
    Timeout,

    #[error("cache operation cancelled or deadline exceeded during {0}")]
    DeadlineExceeded(&'static str),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache backend error during {op} on {key:?}: {source}")]
    Backend {
        op: &'static str,
        key: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by the file/object storage subsystem (C7-C10).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unknown storage driver: {0}")]
    UnknownDriver(String),

    #[error("invalid storage driver configuration: {0}")]
    InvalidConfiguration(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file already exists: {0}")]
    FileAlreadyExists(String),

    #[error("permission denied for {0}")]
    PermissionDenied(String),

    #[error("path escapes the storage root: {0}")]
    InvalidPath(String),

    #[error("unsupported checksum algorithm: {0}")]
    Unsupported(String),

    #[error("no disk registered under name: {0}")]
    UnknownDisk(String),

    #[error("upload rejected: {0}")]
    UploadRejected(String),

    #[error("storage operation cancelled or deadline exceeded during {0}")]
    DeadlineExceeded(&'static str),

    #[error("storage backend error during {op} on {path:?}: {source}")]
    Backend {
        op: &'static str,
        path: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error, composing both subsystems so call sites that touch
/// both (e.g. the uploader writing through a disk) can propagate with a
/// single `?`.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type CacheResult<T> = Result<T, CacheError>;
pub type StorageResult<T> = Result<T, StorageError>;
pub type Result<T> = std::result::Result<T, Error>;
