use super::CacheEngine;
use crate::error::{AppError, ConfigError};
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

const SCAN_BATCH: usize = 100;

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    6379
}

fn default_prefix() -> String {
    "__serval".into()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RedisOptions {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub db: i64,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_prefix")]
    pub key_prefix: String,
}

impl Default for RedisOptions {
    fn default() -> Self {
        RedisOptions {
            host: default_host(),
            port: default_port(),
            db: 0,
            password: None,
            key_prefix: default_prefix(),
        }
    }
}

impl RedisOptions {
    pub fn url(&self) -> String {
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Redis-backed engine. Every key is stored as `<key_prefix>:<key>`; the
/// connection is opened on first use.
pub struct RedisCacheEngine {
    client: ::redis::Client,
    conn: OnceCell<ConnectionManager>,
    key_prefix: String,
    default_timeout: u64,
}

impl RedisCacheEngine {
    pub fn new(options: RedisOptions, default_timeout: u64) -> Result<Self, ConfigError> {
        let client = ::redis::Client::open(options.url())
            .map_err(|e| ConfigError::Load(format!("redis cache: {}", e)))?;
        Ok(RedisCacheEngine {
            client,
            conn: OnceCell::new(),
            key_prefix: options.key_prefix,
            default_timeout,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<ConnectionManager, AppError> {
        let conn = self
            .conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CacheEngine for RedisCacheEngine {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, timeout: Option<u64>) -> Result<(), AppError> {
        let mut conn = self.connection().await?;
        let seconds = timeout.unwrap_or(self.default_timeout);
        let full_key = self.key(key);
        if seconds > 0 {
            let _: () = conn.set_ex(&full_key, value, seconds).await?;
        } else {
            let _: () = conn.set(&full_key, value).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(self.key(key)).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), AppError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}:*", self.key_prefix);
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let _: () = conn.del(keys).await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        tracing::debug!(prefix = %self.key_prefix, "redis cache cleared");
        Ok(())
    }
}
