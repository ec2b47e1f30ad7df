use super::CacheEngine;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct Item {
    value: String,
    expires: Option<DateTime<Utc>>,
}

impl Item {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|at| now > at).unwrap_or(false)
    }
}

/// In-process engine. Expired items are dropped when next read.
pub struct DummyCacheEngine {
    items: Mutex<HashMap<String, Item>>,
    default_timeout: u64,
    clock: Clock,
}

impl fmt::Debug for DummyCacheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DummyCacheEngine")
            .field("items", &self.items.lock().len())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl DummyCacheEngine {
    pub fn new(default_timeout: u64) -> Self {
        DummyCacheEngine {
            items: Mutex::new(HashMap::new()),
            default_timeout,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Stored items, expired ones included.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheEngine for DummyCacheEngine {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let now = (self.clock)();
        let mut items = self.items.lock();
        match items.get(key) {
            Some(item) if item.is_expired(now) => {
                items.remove(key);
                Ok(None)
            }
            Some(item) => Ok(Some(item.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, timeout: Option<u64>) -> Result<(), AppError> {
        let seconds = timeout.unwrap_or(self.default_timeout);
        let expires = (seconds > 0).then(|| (self.clock)() + Duration::seconds(seconds as i64));
        self.items.lock().insert(
            key.to_string(),
            Item {
                value: value.to_string(),
                expires,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.items.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), AppError> {
        self.items.lock().clear();
        Ok(())
    }
}
