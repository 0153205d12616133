//! Cache-subsystem view of the Driver Registry (C1): `name -> factory`
//! table for cache drivers, registered at process start by each driver
//! module.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::ConfigMap;
use crate::error::CacheResult;
use crate::registry::Registry;

use super::manager::SharedCacheStore;

pub type CacheFactoryFuture = Pin<Box<dyn Future<Output = CacheResult<SharedCacheStore>> + Send>>;
pub type CacheFactory = Arc<dyn Fn(ConfigMap) -> CacheFactoryFuture + Send + Sync>;

pub struct CacheDriverRegistry {
    inner: Registry<CacheFactory>,
}

impl CacheDriverRegistry {
    pub fn new() -> Self {
        Self { inner: Registry::new() }
    }

    pub fn register<S, F, Fut>(&self, name: S, factory: F)
    where
        S: Into<String>,
        F: Fn(ConfigMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<SharedCacheStore>> + Send + 'static,
    {
        let wrapped: CacheFactory = Arc::new(move |config| Box::pin(factory(config)));
        self.inner.register(name, wrapped);
    }

    pub async fn construct(&self, name: &str, config: ConfigMap) -> CacheResult<SharedCacheStore> {
        let factory = self
            .inner
            .resolve(name)
            .ok_or_else(|| crate::error::CacheError::UnknownDriver(name.to_string()))?;
        (factory)(config).await
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.names()
    }
}

impl Default for CacheDriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the registry pre-populated with this crate's built-in drivers
/// (`memory`, `redis`), the way a process bootstraps the global registry
/// once at startup before any request path can observe it.
pub fn builtin_registry() -> CacheDriverRegistry {
    use crate::config::ConfigMapExt;
    use super::memory::MemoryCacheDriverBuilder;
    use super::remote::RemoteCacheDriverBuilder;
    use std::time::Duration;

    let registry = CacheDriverRegistry::new();

    registry.register("memory", |config: ConfigMap| async move {
        let default_ttl = config.get_duration("expiry");
        let driver = MemoryCacheDriverBuilder::new();
        let driver = match default_ttl {
            Some(ttl) => driver.default_ttl(ttl),
            None => driver,
        };
        Ok(Arc::new(driver.build()) as SharedCacheStore)
    });

    registry.register("redis", |config: ConfigMap| async move {
        let url = resolve_redis_url(&config)?;
        let mut builder = RemoteCacheDriverBuilder::new().url(url);
        if let Some(prefix) = config.get_str("prefix") {
            builder = builder.prefix(prefix);
        }
        if let Some(ttl) = config.get_duration("expiry") {
            builder = builder.default_ttl(ttl);
        }
        if let Some(enabled) = config.get_bool("health_check") {
            builder = builder.health_check(enabled);
        }
        if let Some(interval) = config.get_duration("health_check_interval") {
            builder = builder.health_check_interval(interval);
        }
        let driver = builder.build().await?;
        Ok(Arc::new(driver) as SharedCacheStore)
    });

    registry
}

fn resolve_redis_url(config: &ConfigMap) -> CacheResult<String> {
    use crate::config::ConfigMapExt;
    use crate::error::CacheError;

    if let Some(addr) = config.get_str("addr") {
        return Ok(build_redis_url(addr, &config));
    }
    let host = config.get_str("host").unwrap_or("127.0.0.1");
    let port = config.get_u64("port").unwrap_or(6379);
    Ok(build_redis_url(&format!("{}:{}", host, port), &config))
}

fn build_redis_url(addr: &str, config: &ConfigMap) -> String {
    use crate::config::ConfigMapExt;

    let db = config.get_u64("db").unwrap_or(0);
    match (config.get_str("username"), config.get_str("password")) {
        (Some(user), Some(pass)) => format!("redis://{}:{}@{}/{}", user, pass, addr, db),
        (None, Some(pass)) => format!("redis://:{}@{}/{}", pass, addr, db),
        _ => format!("redis://{}/{}", addr, db),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_driver_is_registered_by_default() {
        let registry = builtin_registry();
        let names = registry.names();
        assert!(names.contains(&"memory".to_string()));
        assert!(names.contains(&"redis".to_string()));

        let store = registry.construct("memory", ConfigMap::new()).await.unwrap();
        store
            .set(
                &crate::deadline::Deadline::none(),
                "k",
                super::super::value::CacheValue::Int(1),
                super::super::contract::SetOptions::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_driver_name_is_reported() {
        let registry = builtin_registry();
        let result = registry.construct("nonexistent", ConfigMap::new()).await;
        assert!(result.is_err());
    }
}
