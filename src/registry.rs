//! Process-wide driver registry (C1), shared by the cache and storage
//! subsystems. Each subsystem wraps this with its own factory signature
//! (see `cache::registry` and `storage::registry`).

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// `name -> factory` table. Registration is an idempotent overwrite
/// (last registration wins); resolution is a plain lookup. Reads are
/// common (every `Construct` call), writes happen only at process start
/// and the occasional administrative re-register, so a reader/writer
/// lock is the right tool.
pub struct Registry<F> {
    factories: RwLock<HashMap<String, Arc<F>>>,
}

impl<F> Registry<F> {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a factory under `name`. Last registration for a given
    /// name wins; this is intentional so host applications can override a
    /// built-in driver in tests without restarting the registry.
    pub fn register<S: Into<String>>(&self, name: S, factory: F) {
        self.factories.write().insert(name.into(), Arc::new(factory));
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<F>> {
        self.factories.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }
}

impl<F> Default for Registry<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_last_write_wins_and_resolve_is_a_lookup() {
        let registry: Registry<i32> = Registry::new();
        registry.register("a", 1);
        registry.register("a", 2);
        registry.register("b", 3);

        assert_eq!(*registry.resolve("a").unwrap(), 2);
        assert_eq!(*registry.resolve("b").unwrap(), 3);
        assert!(registry.resolve("missing").is_none());

        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
