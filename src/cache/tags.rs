//! Tag Manager (C3): bidirectional `tag <-> key` bindings.
//!
//! Invariant: a key is listed under a tag iff the
//! tag is listed under the key. Deleting a key scrubs it from every tag it
//! was under; deleting a tag scrubs the tag from every key's set but does
//! **not** delete cache items — only the explicit tag-flush operation on
//! the cache contract does that.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::CacheResult;

#[async_trait]
pub trait TagManager: Send + Sync {
    async fn add_tags(&self, key: &str, tags: &[String]) -> CacheResult<()>;
    async fn remove_tags(&self, key: &str, tags: &[String]) -> CacheResult<()>;
    async fn keys_for_tag(&self, tag: &str) -> CacheResult<Vec<String>>;
    async fn remove_key_from_all(&self, key: &str) -> CacheResult<()>;
    async fn remove_tag(&self, tag: &str) -> CacheResult<()>;
    async fn clear(&self) -> CacheResult<()>;
}

#[derive(Default)]
struct TagState {
    tag_to_keys: HashMap<String, HashSet<String>>,
    key_to_tags: HashMap<String, HashSet<String>>,
}

/// In-process implementation backing both the in-memory cache driver (C4)
/// and, conceptually, any driver that doesn't need the bindings to survive
/// past the process. Holds both maps under a single lock so a concurrent
/// reader of `keys_for_tag` never observes a binding that is listed on one
/// side but not the other.
pub struct LocalTagManager {
    state: RwLock<TagState>,
}

impl LocalTagManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TagState::default()),
        }
    }
}

impl Default for LocalTagManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TagManager for LocalTagManager {
    async fn add_tags(&self, key: &str, tags: &[String]) -> CacheResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        for tag in tags {
            state
                .tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
            state
                .key_to_tags
                .entry(key.to_string())
                .or_default()
                .insert(tag.clone());
        }
        Ok(())
    }

    async fn remove_tags(&self, key: &str, tags: &[String]) -> CacheResult<()> {
        let mut state = self.state.write();
        for tag in tags {
            if let Some(keys) = state.tag_to_keys.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    state.tag_to_keys.remove(tag);
                }
            }
        }
        if let Some(key_tags) = state.key_to_tags.get_mut(key) {
            for tag in tags {
                key_tags.remove(tag);
            }
            if key_tags.is_empty() {
                state.key_to_tags.remove(key);
            }
        }
        Ok(())
    }

    async fn keys_for_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        let state = self.state.read();
        Ok(state
            .tag_to_keys
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_key_from_all(&self, key: &str) -> CacheResult<()> {
        let mut state = self.state.write();
        if let Some(tags) = state.key_to_tags.remove(key) {
            for tag in tags {
                if let Some(keys) = state.tag_to_keys.get_mut(&tag) {
                    keys.remove(key);
                    if keys.is_empty() {
                        state.tag_to_keys.remove(&tag);
                    }
                }
            }
        }
        Ok(())
    }

    async fn remove_tag(&self, tag: &str) -> CacheResult<()> {
        let mut state = self.state.write();
        if let Some(keys) = state.tag_to_keys.remove(tag) {
            for key in keys {
                if let Some(key_tags) = state.key_to_tags.get_mut(&key) {
                    key_tags.remove(tag);
                    if key_tags.is_empty() {
                        state.key_to_tags.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut state = self.state.write();
        state.tag_to_keys.clear();
        state.key_to_tags.clear();
        Ok(())
    }
}

pub type SharedTagManager = Arc<dyn TagManager>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tag_symmetry_holds_across_add_remove() {
        let tags = LocalTagManager::new();
        tags.add_tags("k1", &["a".into(), "b".into()]).await.unwrap();
        tags.add_tags("k2", &["a".into()]).await.unwrap();

        assert_eq!(tags.keys_for_tag("a").await.unwrap().len(), 2);
        assert_eq!(tags.keys_for_tag("b").await.unwrap(), vec!["k1".to_string()]);

        tags.remove_key_from_all("k1").await.unwrap();
        assert_eq!(tags.keys_for_tag("a").await.unwrap(), vec!["k2".to_string()]);
        assert!(tags.keys_for_tag("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_tag_does_not_require_item_deletion() {
        let tags = LocalTagManager::new();
        tags.add_tags("k1", &["a".into()]).await.unwrap();
        tags.remove_tag("a").await.unwrap();
        assert!(tags.keys_for_tag("a").await.unwrap().is_empty());
    }
}
