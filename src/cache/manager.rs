//! Cache Manager (C6): named-instance cache registry, default selection,
//! lifecycle.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::contract::CacheStore;
use super::remote::RemoteCacheDriver;
use crate::error::{CacheError, CacheResult};

pub type SharedCacheStore = Arc<dyn CacheStore>;

struct ManagerState {
    stores: HashMap<String, SharedCacheStore>,
    /// Kept separately (rather than downcasting `SharedCacheStore`) so
    /// `close` can stop health probes without requiring every driver to
    /// implement a shutdown method through the object-safe `CacheStore`
    /// trait.
    remote_handles: Vec<Arc<RemoteCacheDriver>>,
    default: Option<String>,
}

/// Holds a name→store map and a default name. `close` releases every
/// store exactly once, even if called more than once.
pub struct CacheManager {
    state: RwLock<ManagerState>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ManagerState {
                stores: HashMap::new(),
                remote_handles: Vec::new(),
                default: None,
            }),
        }
    }

    pub fn register<S: Into<String>>(&self, name: S, store: SharedCacheStore) {
        let name = name.into();
        let mut state = self.state.write();
        info!("registering cache store '{}'", name);
        let is_first = state.stores.is_empty();
        state.stores.insert(name.clone(), store);
        if is_first {
            state.default = Some(name);
        }
    }

    /// Like `register`, but also tracks the remote driver handle so
    /// `close` can stop its health probe.
    pub fn register_remote<S: Into<String>>(&self, name: S, store: Arc<RemoteCacheDriver>) {
        let name = name.into();
        let mut state = self.state.write();
        info!("registering remote cache store '{}'", name);
        let is_first = state.stores.is_empty();
        state.stores.insert(name.clone(), store.clone() as SharedCacheStore);
        state.remote_handles.push(store);
        if is_first {
            state.default = Some(name);
        }
    }

    pub fn get(&self, name: &str) -> CacheResult<SharedCacheStore> {
        self.state
            .read()
            .stores
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownStore(name.to_string()))
    }

    pub fn default_store(&self) -> CacheResult<SharedCacheStore> {
        let state = self.state.read();
        let name = state.default.as_ref().ok_or_else(|| CacheError::UnknownStore("<default>".to_string()))?;
        state
            .stores
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownStore(name.clone()))
    }

    pub fn set_default(&self, name: &str) -> CacheResult<()> {
        let mut state = self.state.write();
        if !state.stores.contains_key(name) {
            return Err(CacheError::UnknownStore(name.to_string()));
        }
        state.default = Some(name.to_string());
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.state.read().stores.keys().cloned().collect()
    }

    /// Releases every store: stops health probes on remote drivers and
    /// drops the handles. Idempotent — a duplicate close is a no-op
    /// because the maps are already empty.
    pub async fn close(&self) {
        let (remote_handles, had_stores) = {
            let mut state = self.state.write();
            let had_stores = !state.stores.is_empty();
            state.stores.clear();
            state.default = None;
            (std::mem::take(&mut state.remote_handles), had_stores)
        };
        if had_stores {
            info!("closing cache manager, stopping {} remote health probes", remote_handles.len());
        }
        for handle in remote_handles {
            handle.close().await;
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCacheDriverBuilder;

    #[test]
    fn first_registered_store_becomes_default() {
        let manager = CacheManager::new();
        manager.register("l1", Arc::new(MemoryCacheDriverBuilder::new().build()));
        manager.register("l2", Arc::new(MemoryCacheDriverBuilder::new().build()));

        assert!(manager.default_store().is_ok());
        assert!(manager.get("l1").is_ok());
        assert!(manager.get("missing").is_err());
    }

    #[test]
    fn set_default_rejects_unknown_name() {
        let manager = CacheManager::new();
        manager.register("l1", Arc::new(MemoryCacheDriverBuilder::new().build()));
        assert!(manager.set_default("l2").is_err());
        assert!(manager.set_default("l1").is_ok());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let manager = CacheManager::new();
        manager.register("l1", Arc::new(MemoryCacheDriverBuilder::new().build()));
        manager.close().await;
        manager.close().await;
        assert!(manager.names().is_empty());
    }
}
