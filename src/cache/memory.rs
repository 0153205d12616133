//! In-Memory Cache Driver (C4): a concurrent in-process map with lazy
//! expiration-on-read and an explicit, host-invokable GC sweep for
//! physical reclamation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::contract::{CacheStore, SetOptions};
use super::entry::CacheItem;
use super::tags::{LocalTagManager, TagManager};
use super::value::CacheValue;
use crate::deadline::Deadline;
use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone, Default)]
pub struct MemoryDriverConfig {
    /// Default TTL applied when `set` is called without one.
    pub default_ttl: Option<Duration>,
}

/// High-performance in-memory cache driver. Readers (`get`/`has`/
/// `get_multiple`/`count`) run concurrently; writers (`set`/`delete`/
/// `clear`/`increment`) take the exclusive half of the lock.
pub struct MemoryCacheDriver {
    items: RwLock<HashMap<String, CacheItem>>,
    tags: Arc<LocalTagManager>,
    config: MemoryDriverConfig,
}

impl MemoryCacheDriver {
    pub fn new(config: MemoryDriverConfig) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            tags: Arc::new(LocalTagManager::new()),
            config,
        }
    }

    /// Physically reclaim every item whose lazy expiry check is stale.
    /// Scans under the read lock, then deletes the collected keys under
    /// the write lock — never correctness-load-bearing (lazy
    /// expiration-on-read already hides stale entries), purely a memory
    /// reclamation pass the host can schedule however it likes.
    pub async fn gc(&self) -> CacheResult<u64> {
        let expired: Vec<String> = {
            let items = self.items.read();
            items
                .iter()
                .filter(|(_, item)| item.is_expired())
                .map(|(k, _)| k.clone())
                .collect()
        };
        if expired.is_empty() {
            return Ok(0);
        }
        let refs: Vec<&str> = expired.iter().map(|s| s.as_str()).collect();
        self.delete_multiple(&Deadline::none(), &refs).await
    }

    fn get_live(&self, key: &str) -> Option<CacheValue> {
        let items = self.items.read();
        let item = items.get(key)?;
        if item.is_expired() {
            None
        } else {
            Some(item.value.clone())
        }
    }
}

/// Every method below begins with this check. The in-memory driver never
/// blocks on I/O, so a deadline/cancellation has nothing to race against
/// mid-operation; honoring an already-expired deadline up front is the
/// only meaningful thing a driver with no natural blocking point can do
/// with one.
fn check(deadline: &Deadline, op: &'static str) -> CacheResult<()> {
    if deadline.is_expired() {
        Err(CacheError::DeadlineExceeded(op))
    } else {
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheDriver {
    async fn get(&self, deadline: &Deadline, key: &str) -> CacheResult<CacheValue> {
        check(deadline, "get")?;
        self.get_live(key).ok_or_else(|| CacheError::CacheMiss(key.to_string()))
    }

    async fn set(&self, deadline: &Deadline, key: &str, value: CacheValue, opts: SetOptions) -> CacheResult<()> {
        check(deadline, "set")?;
        let expiration = opts.expiration.or(self.config.default_ttl);
        let item = CacheItem::new(value, expiration).with_tags(opts.tags.clone());

        {
            let mut items = self.items.write();
            if let Some(old) = items.get(key) {
                self.tags.remove_tags(key, &old.tags).await?;
            }
            items.insert(key.to_string(), item);
        }
        self.tags.add_tags(key, &opts.tags).await?;
        Ok(())
    }

    async fn delete(&self, deadline: &Deadline, key: &str) -> CacheResult<bool> {
        check(deadline, "delete")?;
        let removed = self.items.write().remove(key).is_some();
        if removed {
            self.tags.remove_key_from_all(key).await?;
        }
        Ok(removed)
    }

    async fn has(&self, deadline: &Deadline, key: &str) -> CacheResult<bool> {
        check(deadline, "has")?;
        Ok(self.get_live(key).is_some())
    }

    async fn clear(&self, deadline: &Deadline) -> CacheResult<()> {
        check(deadline, "clear")?;
        self.items.write().clear();
        self.tags.clear().await
    }

    async fn get_multiple(&self, deadline: &Deadline, keys: &[&str]) -> CacheResult<HashMap<String, CacheValue>> {
        check(deadline, "get_multiple")?;
        let items = self.items.read();
        Ok(keys
            .iter()
            .filter_map(|k| {
                let item = items.get(*k)?;
                if item.is_expired() {
                    None
                } else {
                    Some((k.to_string(), item.value.clone()))
                }
            })
            .collect())
    }

    async fn set_multiple(
        &self,
        deadline: &Deadline,
        items: &[(&str, CacheValue)],
        opts: SetOptions,
    ) -> CacheResult<()> {
        check(deadline, "set_multiple")?;
        for (key, value) in items {
            self.set(deadline, key, value.clone(), opts.clone()).await?;
        }
        Ok(())
    }

    async fn delete_multiple(&self, deadline: &Deadline, keys: &[&str]) -> CacheResult<u64> {
        check(deadline, "delete_multiple")?;
        let mut deleted = 0u64;
        for key in keys {
            if self.delete(deadline, key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn increment(&self, deadline: &Deadline, key: &str, delta: i64) -> CacheResult<i64> {
        check(deadline, "increment")?;
        let mut items = self.items.write();
        match items.get_mut(key) {
            Some(item) if !item.is_expired() => {
                let current = item.value.as_counter().ok_or_else(|| CacheError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("stored value is a {}", item.value.kind()),
                })?;
                let updated = current.checked_add(delta).unwrap_or(current);
                item.value = CacheValue::Int(updated);
                Ok(updated)
            }
            _ => {
                items.insert(key.to_string(), CacheItem::new(CacheValue::Int(delta), None));
                Ok(delta)
            }
        }
    }

    async fn tagged_get(&self, deadline: &Deadline, tag: &str) -> CacheResult<HashMap<String, CacheValue>> {
        check(deadline, "tagged_get")?;
        let keys = self.tags.keys_for_tag(tag).await?;
        let refs: Vec<&str> = keys.iter().map(|s| s.as_str()).collect();
        self.get_multiple(deadline, &refs).await
    }

    async fn tagged_delete(&self, deadline: &Deadline, tag: &str) -> CacheResult<u64> {
        check(deadline, "tagged_delete")?;
        let keys = self.tags.keys_for_tag(tag).await?;
        let refs: Vec<&str> = keys.iter().map(|s| s.as_str()).collect();
        let deleted = self.delete_multiple(deadline, &refs).await?;
        self.tags.remove_tag(tag).await?;
        Ok(deleted)
    }

    async fn count(&self, deadline: &Deadline) -> CacheResult<u64> {
        check(deadline, "count")?;
        let items = self.items.read();
        Ok(items.values().filter(|i| !i.is_expired()).count() as u64)
    }
}

pub struct MemoryCacheDriverBuilder {
    config: MemoryDriverConfig,
}

impl MemoryCacheDriverBuilder {
    pub fn new() -> Self {
        Self {
            config: MemoryDriverConfig::default(),
        }
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = Some(ttl);
        self
    }

    pub fn build(self) -> MemoryCacheDriver {
        MemoryCacheDriver::new(self.config)
    }
}

impl Default for MemoryCacheDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic_get_set_delete_has() {
        let driver = MemoryCacheDriverBuilder::new().build();
        driver.set(&Deadline::none(), "key1", CacheValue::Text("value1".into()), SetOptions::new()).await.unwrap();

        assert_eq!(driver.get(&Deadline::none(), "key1").await.unwrap(), CacheValue::Text("value1".into()));
        assert!(driver.has(&Deadline::none(), "key1").await.unwrap());
        assert!(!driver.has(&Deadline::none(), "missing").await.unwrap());
        assert!(driver.delete(&Deadline::none(), "key1").await.unwrap());
        assert!(!driver.has(&Deadline::none(), "key1").await.unwrap());
        assert!(!driver.delete(&Deadline::none(), "key1").await.unwrap());
    }

    #[tokio::test]
    async fn expiry_is_observed_lazily_on_read() {
        let driver = MemoryCacheDriverBuilder::new().build();
        driver
            .set(
                &Deadline::none(),
                "tmp",
                CacheValue::Text("x".into()),
                SetOptions::new().with_ttl(Duration::from_millis(20)),
            )
            .await
            .unwrap();

        assert!(driver.has(&Deadline::none(), "tmp").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!driver.has(&Deadline::none(), "tmp").await.unwrap());
        assert!(matches!(driver.get(&Deadline::none(), "tmp").await, Err(CacheError::CacheMiss(_))));
    }

    #[tokio::test]
    async fn gc_physically_reclaims_expired_entries() {
        let driver = MemoryCacheDriverBuilder::new().build();
        driver
            .set(
                &Deadline::none(),
                "tmp",
                CacheValue::Int(1),
                SetOptions::new().with_ttl(Duration::from_millis(10)),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(driver.gc().await.unwrap(), 1);
        assert_eq!(driver.items.read().len(), 0);
    }

    #[tokio::test]
    async fn increment_seeds_at_delta_and_accumulates() {
        let driver = MemoryCacheDriverBuilder::new().build();
        assert_eq!(driver.increment(&Deadline::none(), "hits", 5).await.unwrap(), 5);
        assert_eq!(driver.increment(&Deadline::none(), "hits", 3).await.unwrap(), 8);
        assert_eq!(driver.decrement(&Deadline::none(), "hits", 2).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn increment_on_non_numeric_value_fails_without_changing_it() {
        let driver = MemoryCacheDriverBuilder::new().build();
        driver.set(&Deadline::none(), "k", CacheValue::Text("not a number".into()), SetOptions::new()).await.unwrap();
        let result = driver.increment(&Deadline::none(), "k", 1).await;
        assert!(matches!(result, Err(CacheError::InvalidValue { .. })));
        assert_eq!(driver.get(&Deadline::none(), "k").await.unwrap(), CacheValue::Text("not a number".into()));
    }

    #[tokio::test]
    async fn increment_preserves_ttl() {
        let driver = MemoryCacheDriverBuilder::new().build();
        driver
            .set(
                &Deadline::none(),
                "hits",
                CacheValue::Int(5),
                SetOptions::new().with_ttl(Duration::from_secs(3600)).with_tags(vec!["metrics".into()]),
            )
            .await
            .unwrap();
        driver.increment(&Deadline::none(), "hits", 3).await.unwrap();
        assert_eq!(driver.get(&Deadline::none(), "hits").await.unwrap(), CacheValue::Int(8));
        assert_eq!(driver.tagged_get(&Deadline::none(), "metrics").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tagged_flush_scenario() {
        let driver = MemoryCacheDriverBuilder::new().build();
        driver
            .set(&Deadline::none(), "users:1", CacheValue::Int(1), SetOptions::new().with_tags(vec!["users".into()]))
            .await
            .unwrap();
        driver
            .set(&Deadline::none(), "users:2", CacheValue::Int(2), SetOptions::new().with_tags(vec!["users".into()]))
            .await
            .unwrap();
        driver
            .set(&Deadline::none(), "stats:daily", CacheValue::Int(42), SetOptions::new().with_tags(vec!["stats".into()]))
            .await
            .unwrap();

        let deleted = driver.tagged_delete(&Deadline::none(), "users").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(driver.count(&Deadline::none()).await.unwrap(), 1);
        assert_eq!(driver.get(&Deadline::none(), "stats:daily").await.unwrap(), CacheValue::Int(42));
        assert!(matches!(driver.get(&Deadline::none(), "users:1").await, Err(CacheError::CacheMiss(_))));
    }

    #[tokio::test]
    async fn get_multiple_on_empty_keys_is_an_empty_map() {
        let driver = MemoryCacheDriverBuilder::new().build();
        let result = driver.get_multiple(&Deadline::none(), &[]).await.unwrap();
        assert!(result.is_empty());
    }
}
