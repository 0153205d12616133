//! Storage-subsystem view of the Driver Registry (C1): `name -> factory`
//! table for disk drivers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::ConfigMap;
use crate::error::StorageResult;
use crate::registry::Registry;

use super::manager::SharedFileStore;

pub type StorageFactoryFuture = Pin<Box<dyn Future<Output = StorageResult<SharedFileStore>> + Send>>;
pub type StorageFactory = Arc<dyn Fn(ConfigMap) -> StorageFactoryFuture + Send + Sync>;

pub struct StorageDriverRegistry {
    inner: Registry<StorageFactory>,
}

impl StorageDriverRegistry {
    pub fn new() -> Self {
        Self { inner: Registry::new() }
    }

    pub fn register<S, F, Fut>(&self, name: S, factory: F)
    where
        S: Into<String>,
        F: Fn(ConfigMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StorageResult<SharedFileStore>> + Send + 'static,
    {
        let wrapped: StorageFactory = Arc::new(move |config| Box::pin(factory(config)));
        self.inner.register(name, wrapped);
    }

    pub async fn construct(&self, name: &str, config: ConfigMap) -> StorageResult<SharedFileStore> {
        let factory = self
            .inner
            .resolve(name)
            .ok_or_else(|| crate::error::StorageError::UnknownDriver(name.to_string()))?;
        (factory)(config).await
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.names()
    }
}

impl Default for StorageDriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre-populates the registry with this crate's built-in disk drivers
/// (`local`, `s3`, `oss`, `cos`), parsing each factory's recognized
/// config keys.
pub fn builtin_registry() -> StorageDriverRegistry {
    use crate::config::ConfigMapExt;
    use crate::error::StorageError;
    use super::local::LocalDiskDriverBuilder;
    use super::object_store::cos::CosDriverBuilder;
    use super::object_store::oss::OssDriverBuilder;
    use super::object_store::s3::S3DriverBuilder;

    let registry = StorageDriverRegistry::new();

    registry.register("local", |config: ConfigMap| async move {
        let root = config
            .get_str("root")
            .ok_or_else(|| StorageError::InvalidConfiguration("local disk driver requires 'root'".to_string()))?;
        let mut builder = LocalDiskDriverBuilder::new(std::path::PathBuf::from(root));
        if let Some(prefix) = config.get_str("public_url_prefix") {
            builder = builder.public_url_prefix(prefix);
        }
        builder = builder.default_visibility(visibility_from_config(&config));
        Ok(Arc::new(builder.build()) as SharedFileStore)
    });

    registry.register("s3", |config: ConfigMap| async move {
        let endpoint = require_str(&config, "endpoint")?;
        let bucket = require_str(&config, "bucket")?;
        let mut builder = S3DriverBuilder::new(endpoint, bucket);
        if let (Some(access), Some(secret)) = (config.get_str("access_key"), config.get_str("secret_key")) {
            builder = builder.credentials(access.to_string(), secret.to_string());
        }
        if let Some(region) = config.get_str("region") {
            builder = builder.region(region.to_string());
        }
        if let Some(ssl) = config.get_bool("use_ssl") {
            builder = builder.use_ssl(ssl);
        }
        if let Some(force) = config.get_bool("force_path_style") {
            builder = builder.force_path_style(force);
        }
        if let Some(url) = config.get_str("public_url") {
            builder = builder.public_url(url.to_string());
        }
        builder = builder.default_visibility(visibility_from_config(&config));
        Ok(Arc::new(builder.build()?) as SharedFileStore)
    });

    registry.register("oss", |config: ConfigMap| async move {
        let endpoint = require_str(&config, "endpoint")?;
        let bucket = require_str(&config, "bucket")?;
        let mut builder = OssDriverBuilder::new(endpoint, bucket);
        if let (Some(id), Some(secret)) = (config.get_str("access_key_id"), config.get_str("access_key_secret")) {
            builder = builder.credentials(id.to_string(), secret.to_string());
        }
        if let Some(ssl) = config.get_bool("use_ssl") {
            builder = builder.use_ssl(ssl);
        }
        if let Some(url) = config.get_str("public_url") {
            builder = builder.public_url(url.to_string());
        }
        builder = builder.default_visibility(visibility_from_config(&config));
        Ok(Arc::new(builder.build()?) as SharedFileStore)
    });

    registry.register("cos", |config: ConfigMap| async move {
        let app_id = require_str(&config, "app_id")?;
        let bucket = require_str(&config, "bucket")?;
        let region = require_str(&config, "region")?;
        let mut builder = CosDriverBuilder::new(app_id, bucket, region);
        if let (Some(id), Some(secret)) = (config.get_str("secret_id"), config.get_str("secret_key")) {
            builder = builder.credentials(id.to_string(), secret.to_string());
        }
        if let Some(ssl) = config.get_bool("use_ssl") {
            builder = builder.use_ssl(ssl);
        }
        if let Some(url) = config.get_str("public_url") {
            builder = builder.public_url(url.to_string());
        }
        if let Some(expiry) = config.get_u64("url_expiry") {
            builder = builder.url_expiry_secs(expiry);
        }
        builder = builder.default_visibility(visibility_from_config(&config));
        Ok(Arc::new(builder.build()?) as SharedFileStore)
    });

    registry
}

fn require_str(config: &ConfigMap, key: &'static str) -> StorageResult<String> {
    use crate::config::ConfigMapExt;
    use crate::error::StorageError;
    config
        .get_str(key)
        .map(str::to_string)
        .ok_or_else(|| StorageError::InvalidConfiguration(format!("missing required key '{}'", key)))
}

fn visibility_from_config(config: &ConfigMap) -> super::file::Visibility {
    use crate::config::ConfigMapExt;
    match config.get_str("default_visibility") {
        Some("public") => super::file::Visibility::Public,
        _ => super::file::Visibility::Private,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_driver_is_registered_and_constructible() {
        let registry = builtin_registry();
        assert!(registry.names().contains(&"local".to_string()));
        assert!(registry.names().contains(&"s3".to_string()));

        let mut config = ConfigMap::new();
        config.insert("root".to_string(), crate::config::ConfigValue::String(std::env::temp_dir().to_string_lossy().to_string()));
        assert!(registry.construct("local", config).await.is_ok());
    }

    #[tokio::test]
    async fn missing_required_key_is_reported_as_invalid_configuration() {
        let registry = builtin_registry();
        let result = registry.construct("local", ConfigMap::new()).await;
        assert!(matches!(result, Err(crate::error::StorageError::InvalidConfiguration(_))));
    }
}
