//! Fetch-through convenience layered on top of the raw Cache Store
//! Contract: a `get`, and on miss, a call to a factory whose result is
//! populated back into the cache before being returned. This is sugar,
//! not a replacement — `CacheStore` stays usable standalone (e.g.
//! directly through `CacheManager::get`).

use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::contract::{CacheStore, SetOptions};
use super::value::CacheValue;
use crate::deadline::Deadline;
use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone, Default)]
pub struct GetOrSetOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thin, stats-tracking façade over a single `CacheStore`. Application
/// code typically holds one of these (obtained from `CacheManager::get`)
/// rather than the raw trait object.
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    stats: Arc<RwLock<CacheStats>>,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store, stats: Arc::new(RwLock::new(CacheStats::default())) }
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.read()
    }

    pub async fn get(&self, deadline: &Deadline, key: &str) -> CacheResult<CacheValue> {
        match self.store.get(deadline, key).await {
            Ok(v) => {
                self.stats.write().hits += 1;
                Ok(v)
            }
            Err(CacheError::CacheMiss(k)) => {
                self.stats.write().misses += 1;
                Err(CacheError::CacheMiss(k))
            }
            Err(e) => {
                self.stats.write().errors += 1;
                Err(e)
            }
        }
    }

    pub async fn set(&self, deadline: &Deadline, key: &str, value: CacheValue, opts: SetOptions) -> CacheResult<()> {
        let result = self.store.set(deadline, key, value, opts).await;
        if result.is_ok() {
            self.stats.write().sets += 1;
        } else {
            self.stats.write().errors += 1;
        }
        result
    }

    pub async fn delete(&self, deadline: &Deadline, key: &str) -> CacheResult<bool> {
        let result = self.store.delete(deadline, key).await;
        match &result {
            Ok(_) => self.stats.write().deletes += 1,
            Err(_) => self.stats.write().errors += 1,
        }
        result
    }

    /// Fetch-through: return the cached value, or call `factory` on a
    /// miss and populate the cache with its result before returning it.
    /// Does not itself deduplicate concurrent callers for the same key —
    /// a distributed coherence protocol across simultaneous callers is out
    /// of scope here; callers that need single-flight behavior should
    /// serialize factory invocation themselves.
    pub async fn get_or_set<F, Fut>(
        &self,
        deadline: &Deadline,
        key: &str,
        factory: F,
        options: GetOrSetOptions,
    ) -> CacheResult<CacheValue>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = CacheResult<CacheValue>> + Send,
    {
        match self.get(deadline, key).await {
            Ok(value) => return Ok(value),
            Err(CacheError::CacheMiss(_)) => {}
            Err(e) => return Err(e),
        }

        debug!("cache miss for {}, invoking factory", key);
        let value = if let Some(timeout) = options.timeout {
            match tokio::time::timeout(timeout, factory()).await {
                Ok(result) => result?,
                Err(_) => return Err(CacheError::Timeout),
            }
        } else {
            factory().await?
        };

        let opts = SetOptions { expiration: options.ttl, tags: options.tags };
        self.set(deadline, key, value.clone(), opts).await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCacheDriverBuilder;

    #[tokio::test]
    async fn get_or_set_populates_cache_on_miss_and_hits_on_repeat() {
        let client = CacheClient::new(Arc::new(MemoryCacheDriverBuilder::new().build()));

        let value = client
            .get_or_set(
                &Deadline::none(),
                "key1",
                || async { Ok(CacheValue::Text("value1".into())) },
                GetOrSetOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(value, CacheValue::Text("value1".into()));

        let value2 = client
            .get_or_set(
                &Deadline::none(),
                "key1",
                || async { Ok(CacheValue::Text("different".into())) },
                GetOrSetOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(value2, CacheValue::Text("value1".into()));

        let stats = client.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn get_or_set_honors_factory_timeout() {
        let client = CacheClient::new(Arc::new(MemoryCacheDriverBuilder::new().build()));
        let result = client
            .get_or_set(
                &Deadline::none(),
                "slow",
                || async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(CacheValue::Int(1))
                },
                GetOrSetOptions { timeout: Some(Duration::from_millis(5)), ..Default::default() },
            )
            .await;
        assert!(matches!(result, Err(CacheError::Timeout)));
    }
}
