//! Storage Manager (C10, manager half): named-disk registry, default
//! selection, lifecycle. Mirrors `CacheManager`.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::contract::FileStore;
use crate::error::{StorageError, StorageResult};

pub type SharedFileStore = Arc<dyn FileStore>;

struct ManagerState {
    disks: HashMap<String, SharedFileStore>,
    default: Option<String>,
}

pub struct StorageManager {
    state: RwLock<ManagerState>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self { state: RwLock::new(ManagerState { disks: HashMap::new(), default: None }) }
    }

    pub fn register<S: Into<String>>(&self, name: S, disk: SharedFileStore) {
        let name = name.into();
        let mut state = self.state.write();
        info!("registering storage disk '{}'", name);
        let is_first = state.disks.is_empty();
        state.disks.insert(name.clone(), disk);
        if is_first {
            state.default = Some(name);
        }
    }

    pub fn get(&self, name: &str) -> StorageResult<SharedFileStore> {
        self.state.read().disks.get(name).cloned().ok_or_else(|| StorageError::UnknownDisk(name.to_string()))
    }

    pub fn default_disk(&self) -> StorageResult<SharedFileStore> {
        let state = self.state.read();
        let name = state.default.as_ref().ok_or_else(|| StorageError::UnknownDisk("<default>".to_string()))?;
        state.disks.get(name).cloned().ok_or_else(|| StorageError::UnknownDisk(name.clone()))
    }

    pub fn set_default(&self, name: &str) -> StorageResult<()> {
        let mut state = self.state.write();
        if !state.disks.contains_key(name) {
            return Err(StorageError::UnknownDisk(name.to_string()));
        }
        state.default = Some(name.to_string());
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.state.read().disks.keys().cloned().collect()
    }

    /// Releases every disk handle. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.write();
        state.disks.clear();
        state.default = None;
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalDiskDriverBuilder;

    #[test]
    fn first_registered_disk_becomes_default() {
        let manager = StorageManager::new();
        manager.register("local", Arc::new(LocalDiskDriverBuilder::new(std::env::temp_dir()).build()));
        assert!(manager.default_disk().is_ok());
        assert!(manager.get("missing").is_err());
    }

    #[test]
    fn close_is_idempotent() {
        let manager = StorageManager::new();
        manager.register("local", Arc::new(LocalDiskDriverBuilder::new(std::env::temp_dir()).build()));
        manager.close();
        manager.close();
        assert!(manager.names().is_empty());
    }
}
