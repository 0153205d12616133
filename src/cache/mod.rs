//! Cache subsystem: driver registry, tag manager, in-memory and external
//! drivers, and the manager that owns named instances of them.

pub mod client;
pub mod contract;
pub mod entry;
pub mod manager;
pub mod memory;
pub mod registry;
pub mod remote;
pub mod tags;
pub mod value;

pub use client::{CacheClient, CacheStats, GetOrSetOptions};
pub use contract::{CacheStore, SetOptions};
pub use entry::CacheItem;
pub use manager::{CacheManager, SharedCacheStore};
pub use memory::{MemoryCacheDriver, MemoryCacheDriverBuilder, MemoryDriverConfig};
pub use registry::{builtin_registry, CacheDriverRegistry};
pub use remote::{HealthStatus, RemoteCacheDriver, RemoteCacheDriverBuilder, RemoteDriverConfig};
pub use tags::{LocalTagManager, RemoteTagManager, SharedTagManager, TagManager};
pub use value::CacheValue;
