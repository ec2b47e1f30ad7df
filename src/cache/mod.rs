//! Process-wide key/value cache.
//!
//! [`init`] builds an engine from a [`CacheConfig`] by looking its `engine`
//! name up in a registry (`dummy` and `redis` are built in). The free
//! functions then talk to that engine and fail with
//! [`AppError::CacheNotInitialized`] until it exists.

mod dummy;
mod redis;

pub use self::dummy::DummyCacheEngine;
pub use self::redis::{RedisCacheEngine, RedisOptions};

use crate::error::{AppError, ConfigError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_TIMEOUT: u64 = 30;

/// `timeout` is in seconds: `None` uses the engine default, `Some(0)` never
/// expires.
#[async_trait]
pub trait CacheEngine: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set(&self, key: &str, value: &str, timeout: Option<u64>) -> Result<(), AppError>;

    async fn delete(&self, key: &str) -> Result<(), AppError>;

    async fn clear(&self) -> Result<(), AppError>;
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CacheConfig {
    pub engine: String,
    #[serde(default = "default_timeout")]
    pub default_timeout: u64,
    /// Engine-specific options (`host`, `port`, `key_prefix`, ...).
    #[serde(flatten)]
    pub options: Map<String, Json>,
}

impl CacheConfig {
    pub fn new(engine: impl Into<String>) -> Self {
        CacheConfig {
            engine: engine.into(),
            default_timeout: DEFAULT_TIMEOUT,
            options: Map::new(),
        }
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

pub type EngineFactory = fn(&CacheConfig) -> Result<Arc<dyn CacheEngine>, ConfigError>;

fn dummy_factory(config: &CacheConfig) -> Result<Arc<dyn CacheEngine>, ConfigError> {
    Ok(Arc::new(DummyCacheEngine::new(config.default_timeout)))
}

fn redis_factory(config: &CacheConfig) -> Result<Arc<dyn CacheEngine>, ConfigError> {
    let options: RedisOptions = serde_json::from_value(Json::Object(config.options.clone()))
        .map_err(|e| ConfigError::Load(format!("redis cache options: {}", e)))?;
    Ok(Arc::new(RedisCacheEngine::new(options, config.default_timeout)?))
}

static REGISTRY: Lazy<RwLock<HashMap<String, EngineFactory>>> = Lazy::new(|| {
    let mut engines: HashMap<String, EngineFactory> = HashMap::new();
    engines.insert("dummy".into(), dummy_factory);
    engines.insert("redis".into(), redis_factory);
    RwLock::new(engines)
});

static ENGINE: Lazy<RwLock<Option<Arc<dyn CacheEngine>>>> = Lazy::new(|| RwLock::new(None));

/// Make a custom engine available to [`init`] under `name`.
pub fn register(name: impl Into<String>, factory: EngineFactory) {
    REGISTRY.write().insert(name.into(), factory);
}

/// Build the configured engine and install it for the process.
pub fn init(config: &CacheConfig) -> Result<(), ConfigError> {
    let factory = REGISTRY
        .read()
        .get(config.engine.as_str())
        .copied()
        .ok_or_else(|| ConfigError::InvalidCacheEngine(config.engine.clone()))?;
    let engine = factory(config)?;
    *ENGINE.write() = Some(engine);
    tracing::info!(engine = %config.engine, default_timeout = config.default_timeout, "cache initialized");
    Ok(())
}

/// Install an already-built engine.
pub fn install(engine: Arc<dyn CacheEngine>) {
    *ENGINE.write() = Some(engine);
}

/// Drop the installed engine.
pub fn reset() {
    *ENGINE.write() = None;
}

pub fn get_engine() -> Result<Arc<dyn CacheEngine>, AppError> {
    ENGINE.read().clone().ok_or(AppError::CacheNotInitialized)
}

/// Stored value, or `default` when the key is missing or expired.
pub async fn get(key: &str, default: Option<&str>) -> Result<Option<String>, AppError> {
    let value = get_engine()?.get(key).await?;
    Ok(value.or_else(|| default.map(str::to_string)))
}

pub async fn set(key: &str, value: &str, timeout: Option<u64>) -> Result<(), AppError> {
    get_engine()?.set(key, value, timeout).await
}

pub async fn delete(key: &str) -> Result<(), AppError> {
    get_engine()?.delete(key).await
}

pub async fn clear() -> Result<(), AppError> {
    get_engine()?.clear().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn calls_fail_before_init() {
        reset();
        assert!(matches!(get("k", None).await, Err(AppError::CacheNotInitialized)));
        assert!(matches!(clear().await, Err(AppError::CacheNotInitialized)));
    }

    #[tokio::test]
    #[serial]
    async fn dummy_round_trip_through_globals() {
        init(&CacheConfig::new("dummy")).unwrap();
        clear().await.unwrap();
        set("testing", "onetwothree", None).await.unwrap();
        assert_eq!(get("testing", None).await.unwrap().as_deref(), Some("onetwothree"));
        assert_eq!(get("woot", Some("bwent")).await.unwrap().as_deref(), Some("bwent"));
        delete("testing").await.unwrap();
        assert_eq!(get("testing", None).await.unwrap(), None);
        reset();
    }

    #[test]
    #[serial]
    fn unknown_engine_is_rejected() {
        assert!(matches!(
            init(&CacheConfig::new("memcached")),
            Err(ConfigError::InvalidCacheEngine(name)) if name == "memcached"
        ));
    }

    #[test]
    fn config_reads_engine_options() {
        let c: CacheConfig =
            serde_json::from_str(r#"{"engine": "redis", "host": "cache", "port": 6380}"#).unwrap();
        assert_eq!(c.default_timeout, DEFAULT_TIMEOUT);
        assert_eq!(c.options.get("host"), Some(&Json::from("cache")));
    }
}
