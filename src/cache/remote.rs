//! External Cache Driver (C5): a remote key-value backend reached over
//! `redis`, with a namespaced keyspace, a remote-side tag manager, and a
//! background health-probe loop.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::contract::{CacheStore, SetOptions};
use super::entry::CacheItem;
use super::tags::TagManager;
use super::value::CacheValue;
use crate::deadline::{guard, Deadline};
use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Connected,
    Disconnected,
    Error,
}

impl HealthStatus {
    fn to_code(self) -> u8 {
        match self {
            HealthStatus::Unknown => 0,
            HealthStatus::Connected => 1,
            HealthStatus::Disconnected => 2,
            HealthStatus::Error => 3,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            1 => HealthStatus::Connected,
            2 => HealthStatus::Disconnected,
            3 => HealthStatus::Error,
            _ => HealthStatus::Unknown,
        }
    }
}

/// Recognized configuration keys: `addr` or (`host`,`port`); `db`;
/// `password`; `username`; `max_retries`; `pool_size`; `min_idle_conns`;
/// `prefix`; `expiry`; `health_check`; `health_check_interval`.
#[derive(Debug, Clone)]
pub struct RemoteDriverConfig {
    pub url: String,
    pub prefix: String,
    pub default_ttl: Option<Duration>,
    /// Accepted and stored for configuration-surface parity with other
    /// pooled drivers, though `redis::aio::ConnectionManager` is itself a
    /// single multiplexed
    /// async connection rather than a discrete pool — concurrent commands
    /// already pipeline over it without head-of-line blocking, so these
    /// values are informational rather than load-bearing today.
    pub pool_size: usize,
    pub min_idle_conns: usize,
    pub max_retries: u32,
    pub health_check: bool,
    pub health_check_interval: Duration,
}

impl Default for RemoteDriverConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            prefix: String::new(),
            default_ttl: None,
            pool_size: 10,
            min_idle_conns: 0,
            max_retries: 0,
            health_check: true,
            health_check_interval: Duration::from_secs(30),
        }
    }
}

/// Remote-side tag manager: each tag's key set and each key's
/// tag set are represented as native Redis sets, namespaced under the same
/// prefix as the data keys so multiple logical stores can share a backend
/// without colliding.
pub struct RemoteTagManager {
    conn: ConnectionManager,
    prefix: String,
}

impl RemoteTagManager {
    pub fn new(conn: ConnectionManager, prefix: String) -> Self {
        Self { conn, prefix }
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}tag:{}", self.prefix, tag)
    }

    fn key_tags_key(&self, key: &str) -> String {
        format!("{}key_tags:{}", self.prefix, key)
    }
}

#[async_trait]
impl TagManager for RemoteTagManager {
    async fn add_tags(&self, key: &str, tags: &[String]) -> CacheResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for tag in tags {
            pipe.sadd(self.tag_key(tag), key).ignore();
            pipe.sadd(self.key_tags_key(key), tag).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await.map_err(CacheError::Redis)
    }

    async fn remove_tags(&self, key: &str, tags: &[String]) -> CacheResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for tag in tags {
            pipe.srem(self.tag_key(tag), key).ignore();
            pipe.srem(self.key_tags_key(key), tag).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await.map_err(CacheError::Redis)
    }

    async fn keys_for_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(self.tag_key(tag)).await.map_err(CacheError::Redis)
    }

    async fn remove_key_from_all(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let key_tags_key = self.key_tags_key(key);
        let tags: Vec<String> = conn.smembers(&key_tags_key).await.map_err(CacheError::Redis)?;
        if tags.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for tag in &tags {
            pipe.srem(self.tag_key(tag), key).ignore();
        }
        pipe.del(&key_tags_key).ignore();
        pipe.query_async::<_, ()>(&mut conn).await.map_err(CacheError::Redis)
    }

    async fn remove_tag(&self, tag: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let tag_key = self.tag_key(tag);
        let keys: Vec<String> = conn.smembers(&tag_key).await.map_err(CacheError::Redis)?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in &keys {
            pipe.srem(self.key_tags_key(key), tag).ignore();
        }
        pipe.del(&tag_key).ignore();
        pipe.query_async::<_, ()>(&mut conn).await.map_err(CacheError::Redis)
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        for pattern in [format!("{}tag:*", self.prefix), format!("{}key_tags:*", self.prefix)] {
            let keys: Vec<String> = conn.keys(&pattern).await.map_err(CacheError::Redis)?;
            if !keys.is_empty() {
                let _: () = conn.del(&keys).await.map_err(CacheError::Redis)?;
            }
        }
        Ok(())
    }
}

/// Remote cache driver backed by Redis (or a Redis-protocol-compatible
/// store). Values travel as a bincode-serialized envelope carrying the
/// full `CacheItem` so reads can reconstruct expiration/tags; expiration
/// is additionally pushed as a native `EX` TTL for backend-side
/// reclamation.
pub struct RemoteCacheDriver {
    conn: ConnectionManager,
    /// Kept alongside the shared, multiplexed `conn` purely so `increment`
    /// can open a dedicated, non-multiplexed connection per call (see its
    /// doc comment) — `redis-rs` documents `WATCH`/`MULTI`/`EXEC` as unsafe
    /// to run over a connection other operations share.
    client: redis::Client,
    prefix: String,
    default_ttl: Option<Duration>,
    tags: Arc<RemoteTagManager>,
    health: Arc<AtomicU8>,
    shutdown: Arc<Notify>,
    probe: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RemoteCacheDriver {
    pub async fn connect(config: RemoteDriverConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(CacheError::Redis)?;
        let conn = ConnectionManager::new(client.clone()).await.map_err(CacheError::Redis)?;

        let tags = Arc::new(RemoteTagManager::new(conn.clone(), config.prefix.clone()));
        let health = Arc::new(AtomicU8::new(HealthStatus::Unknown.to_code()));
        let shutdown = Arc::new(Notify::new());

        let probe = if config.health_check {
            Some(spawn_health_probe(
                conn.clone(),
                config.health_check_interval,
                health.clone(),
                shutdown.clone(),
            ))
        } else {
            None
        };

        Ok(Self {
            conn,
            client,
            prefix: config.prefix,
            default_ttl: config.default_ttl,
            tags,
            health,
            shutdown,
            probe: parking_lot::Mutex::new(probe),
        })
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus::from_code(self.health.load(Ordering::Relaxed))
    }

    pub fn tag_manager(&self) -> Arc<RemoteTagManager> {
        self.tags.clone()
    }

    /// Stops the health-probe task. Safe to call more than once (spec
    /// §4.5/§9: "a common bug is letting it race with close").
    pub async fn close(&self) {
        if let Some(handle) = self.probe.lock().take() {
            self.shutdown.notify_waiters();
            handle.abort();
        }
    }

    fn data_key(&self, key: &str) -> String {
        format!("{}data:{}", self.prefix, key)
    }

    fn serialize(&self, item: &CacheItem) -> CacheResult<Vec<u8>> {
        bincode::serde::encode_to_vec(item, bincode::config::standard())
            .map_err(|e| CacheError::Backend { op: "serialize", key: None, source: e.into() })
    }

    fn deserialize(&self, bytes: &[u8]) -> CacheResult<CacheItem> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(item, _)| item)
            .map_err(|e| CacheError::Backend { op: "deserialize", key: None, source: e.into() })
    }

    async fn write_item(&self, conn: &mut ConnectionManager, full_key: &str, item: &CacheItem) -> CacheResult<()> {
        let payload = self.serialize(item)?;
        match item.expiration {
            Some(ttl) if !ttl.is_zero() => {
                let secs = ttl.as_secs().max(1);
                let _: () = conn.set_ex(full_key, payload, secs).await.map_err(CacheError::Redis)?;
            }
            _ => {
                let _: () = conn.set(full_key, payload).await.map_err(CacheError::Redis)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RemoteCacheDriver {
    async fn get(&self, deadline: &Deadline, key: &str) -> CacheResult<CacheValue> {
        guard(deadline, CacheError::DeadlineExceeded("get"), async {
            let mut conn = self.conn.clone();
            let full_key = self.data_key(key);
            let raw: Option<Vec<u8>> = conn.get(&full_key).await.map_err(CacheError::Redis)?;

            match raw {
                Some(bytes) => {
                    let item = self.deserialize(&bytes)?;
                    if item.is_expired() {
                        Err(CacheError::CacheMiss(key.to_string()))
                    } else {
                        Ok(item.value)
                    }
                }
                None => Err(CacheError::CacheMiss(key.to_string())),
            }
        })
        .await
    }

    async fn set(&self, deadline: &Deadline, key: &str, value: CacheValue, opts: SetOptions) -> CacheResult<()> {
        guard(deadline, CacheError::DeadlineExceeded("set"), async {
            let mut conn = self.conn.clone();
            let full_key = self.data_key(key);
            let expiration = opts.expiration.or(self.default_ttl);
            let item = CacheItem::new(value, expiration).with_tags(opts.tags.clone());

            self.write_item(&mut conn, &full_key, &item).await?;
            self.tags.add_tags(key, &opts.tags).await
        })
        .await
    }

    async fn delete(&self, deadline: &Deadline, key: &str) -> CacheResult<bool> {
        guard(deadline, CacheError::DeadlineExceeded("delete"), async {
            let mut conn = self.conn.clone();
            let full_key = self.data_key(key);
            let removed: u32 = conn.del(&full_key).await.map_err(CacheError::Redis)?;
            if removed > 0 {
                self.tags.remove_key_from_all(key).await?;
            }
            Ok(removed > 0)
        })
        .await
    }

    async fn has(&self, deadline: &Deadline, key: &str) -> CacheResult<bool> {
        match self.get(deadline, key).await {
            Ok(_) => Ok(true),
            Err(CacheError::CacheMiss(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn clear(&self, deadline: &Deadline) -> CacheResult<()> {
        guard(deadline, CacheError::DeadlineExceeded("clear"), async {
            let mut conn = self.conn.clone();
            let pattern = format!("{}data:*", self.prefix);
            let keys: Vec<String> = conn.keys(&pattern).await.map_err(CacheError::Redis)?;
            if !keys.is_empty() {
                let _: () = conn.del(&keys).await.map_err(CacheError::Redis)?;
            }
            self.tags.clear().await
        })
        .await
    }

    async fn get_multiple(&self, deadline: &Deadline, keys: &[&str]) -> CacheResult<HashMap<String, CacheValue>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        guard(deadline, CacheError::DeadlineExceeded("get_multiple"), async {
            let mut conn = self.conn.clone();
            let full_keys: Vec<String> = keys.iter().map(|k| self.data_key(k)).collect();
            let raw: Vec<Option<Vec<u8>>> = conn.mget(&full_keys).await.map_err(CacheError::Redis)?;

            let mut out = HashMap::new();
            for (key, entry) in keys.iter().zip(raw.into_iter()) {
                if let Some(bytes) = entry {
                    let item = self.deserialize(&bytes)?;
                    if !item.is_expired() {
                        out.insert(key.to_string(), item.value);
                    }
                }
            }
            Ok(out)
        })
        .await
    }

    async fn set_multiple(&self, deadline: &Deadline, items: &[(&str, CacheValue)], opts: SetOptions) -> CacheResult<()> {
        guard(deadline, CacheError::DeadlineExceeded("set_multiple"), async {
            let mut conn = self.conn.clone();
            let expiration = opts.expiration.or(self.default_ttl);
            let mut pipe = redis::pipe();
            pipe.atomic();
            for (key, value) in items {
                let item = CacheItem::new(value.clone(), expiration).with_tags(opts.tags.clone());
                let payload = self.serialize(&item)?;
                let full_key = self.data_key(key);
                match expiration {
                    Some(ttl) if !ttl.is_zero() => {
                        pipe.set_ex(full_key, payload, ttl.as_secs().max(1)).ignore();
                    }
                    _ => {
                        pipe.set(full_key, payload).ignore();
                    }
                }
            }
            pipe.query_async::<_, ()>(&mut conn).await.map_err(CacheError::Redis)?;

            for (key, _) in items {
                self.tags.add_tags(key, &opts.tags).await?;
            }
            Ok(())
        })
        .await
    }

    async fn delete_multiple(&self, deadline: &Deadline, keys: &[&str]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        guard(deadline, CacheError::DeadlineExceeded("delete_multiple"), async {
            let mut conn = self.conn.clone();
            let full_keys: Vec<String> = keys.iter().map(|k| self.data_key(k)).collect();
            let deleted: u64 = conn.del(&full_keys).await.map_err(CacheError::Redis)?;
            for key in keys {
                self.tags.remove_key_from_all(key).await?;
            }
            Ok(deleted)
        })
        .await
    }

    /// A counter update against an envelope-wrapped value can't be a raw
    /// `INCRBY`, since the envelope must stay intact to preserve TTL and
    /// tags. Instead this does a "read envelope, bump, write back" under
    /// an optimistic `WATCH`/`MULTI` retry loop: a concurrent writer that
    /// changes the key between our `GET` and `EXEC` causes Redis to abort
    /// the transaction, which we detect and retry.
    ///
    /// Uses a fresh, dedicated connection from `self.client` rather than
    /// cloning the shared `ConnectionManager` — `redis-rs` documents
    /// `WATCH`/`MULTI`/`EXEC` as unsafe over a multiplexed connection,
    /// since an unrelated command from another concurrent caller sharing
    /// the same physical connection could be interleaved into our
    /// transaction.
    async fn increment(&self, deadline: &Deadline, key: &str, delta: i64) -> CacheResult<i64> {
        guard(deadline, CacheError::DeadlineExceeded("increment"), async {
            let mut conn = self.client.get_async_connection().await.map_err(CacheError::Redis)?;
            let full_key = self.data_key(key);

            loop {
                let _: () = redis::cmd("WATCH").arg(&full_key).query_async(&mut conn).await.map_err(CacheError::Redis)?;

                let raw: Option<Vec<u8>> = redis::cmd("GET").arg(&full_key).query_async(&mut conn).await.map_err(CacheError::Redis)?;
                let mut item = match &raw {
                    Some(bytes) => self.deserialize(bytes)?,
                    None => CacheItem::new(CacheValue::Int(0), None),
                };
                if raw.is_some() && item.is_expired() {
                    item = CacheItem::new(CacheValue::Int(0), None);
                }

                let current = if raw.is_some() {
                    item.value.as_counter().ok_or_else(|| CacheError::InvalidValue {
                        key: key.to_string(),
                        reason: format!("stored value is a {}", item.value.kind()),
                    })?
                } else {
                    0
                };
                let updated = current.checked_add(delta).unwrap_or(current);
                item.value = CacheValue::Int(updated);

                let payload = self.serialize(&item)?;
                let mut pipe = redis::pipe();
                pipe.atomic();
                match item.expiration {
                    Some(ttl) if !ttl.is_zero() => {
                        pipe.set_ex(&full_key, payload, ttl.as_secs().max(1)).ignore();
                    }
                    _ => {
                        pipe.set(&full_key, payload).ignore();
                    }
                }

                let result: Option<()> = pipe.query_async(&mut conn).await.map_err(CacheError::Redis)?;
                match result {
                    Some(_) => return Ok(updated),
                    None => {
                        debug!("increment on {} lost the optimistic race, retrying", key);
                        continue;
                    }
                }
            }
        })
        .await
    }

    async fn tagged_get(&self, deadline: &Deadline, tag: &str) -> CacheResult<HashMap<String, CacheValue>> {
        let keys = self.tags.keys_for_tag(tag).await?;
        let refs: Vec<&str> = keys.iter().map(|s| s.as_str()).collect();
        self.get_multiple(deadline, &refs).await
    }

    async fn tagged_delete(&self, deadline: &Deadline, tag: &str) -> CacheResult<u64> {
        let keys = self.tags.keys_for_tag(tag).await?;
        let refs: Vec<&str> = keys.iter().map(|s| s.as_str()).collect();
        let deleted = self.delete_multiple(deadline, &refs).await?;
        self.tags.remove_tag(tag).await?;
        Ok(deleted)
    }

    async fn count(&self, deadline: &Deadline) -> CacheResult<u64> {
        guard(deadline, CacheError::DeadlineExceeded("count"), async {
            let mut conn = self.conn.clone();
            let pattern = format!("{}data:*", self.prefix);
            let keys: Vec<String> = conn.keys(&pattern).await.map_err(CacheError::Redis)?;
            Ok(keys.len() as u64)
        })
        .await
    }
}

fn spawn_health_probe(
    mut conn: ConnectionManager,
    interval: Duration,
    health: Arc<AtomicU8>,
    shutdown: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let probe_timeout = Duration::from_secs(2);
                    let outcome = tokio::time::timeout(
                        probe_timeout,
                        redis::cmd("PING").query_async::<_, String>(&mut conn),
                    )
                    .await;

                    let status = match outcome {
                        Ok(Ok(_)) => HealthStatus::Connected,
                        Ok(Err(e)) => {
                            warn!("cache health probe failed: {}", e);
                            HealthStatus::Error
                        }
                        Err(_) => {
                            warn!("cache health probe timed out");
                            HealthStatus::Disconnected
                        }
                    };
                    health.store(status.to_code(), Ordering::Relaxed);
                }
                _ = shutdown.notified() => {
                    debug!("cache health probe stopping");
                    break;
                }
            }
        }
    })
}

pub struct RemoteCacheDriverBuilder {
    config: RemoteDriverConfig,
}

impl RemoteCacheDriverBuilder {
    pub fn new() -> Self {
        Self { config: RemoteDriverConfig::default() }
    }

    pub fn url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.url = url.into();
        self
    }

    pub fn prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = Some(ttl);
        self
    }

    pub fn health_check(mut self, enabled: bool) -> Self {
        self.config.health_check = enabled;
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    pub async fn build(self) -> CacheResult<RemoteCacheDriver> {
        RemoteCacheDriver::connect(self.config).await
    }
}

impl Default for RemoteCacheDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // requires a live Redis server
    async fn basic_roundtrip_against_live_redis() {
        let driver = RemoteCacheDriverBuilder::new()
            .url("redis://127.0.0.1:6379")
            .prefix("unicache_test:")
            .build()
            .await
            .unwrap();

        driver.set(&Deadline::none(), "key1", CacheValue::Text("value1".into()), SetOptions::new()).await.unwrap();
        assert_eq!(driver.get(&Deadline::none(), "key1").await.unwrap(), CacheValue::Text("value1".into()));
        assert!(driver.delete(&Deadline::none(), "key1").await.unwrap());
        driver.close().await;
    }

    #[test]
    fn health_status_code_roundtrips() {
        for status in [HealthStatus::Unknown, HealthStatus::Connected, HealthStatus::Disconnected, HealthStatus::Error] {
            assert_eq!(HealthStatus::from_code(status.to_code()), status);
        }
    }
}
