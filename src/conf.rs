//! Process-wide settings.
//!
//! Loaded once at startup from an optional JSON file, then the environment
//! (`.env` is read through `dotenvy`). Readers take a cheap snapshot with
//! [`get`]; tests swap values temporarily with [`override_settings`].

use crate::cache::CacheConfig;
use crate::error::ConfigError;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ENV_DEBUG: &str = "SERVAL_DEBUG";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_BIND: &str = "SERVAL_BIND";
pub const ENV_MODELS: &str = "SERVAL_MODELS";

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Error bodies carry a traceback when set.
    pub debug: bool,
    pub database_url: String,
    pub bind: String,
    pub cache: Option<CacheConfig>,
    /// JSON model document (tables, columns, api entities).
    pub models_path: Option<PathBuf>,
    /// Default `(per_page, max_per_page)` for view sets that paginate.
    pub page_size: Option<(u32, u32)>,
    /// Project-specific settings.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Json>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            debug: false,
            database_url: "postgres://localhost/serval".into(),
            bind: "127.0.0.1:8080".into(),
            cache: None,
            models_path: None,
            page_size: None,
            extra: BTreeMap::new(),
        }
    }
}

fn truthy(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Settings {
    /// Read `path` (when given) and apply the process environment on top.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        dotenvy::dotenv().ok();
        let mut settings = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .map_err(|e| ConfigError::Load(format!("{}: {}", p.display(), e)))?;
                serde_json::from_str(&text).map_err(|e| ConfigError::Load(format!("{}: {}", p.display(), e)))?
            }
            None => Settings::default(),
        };
        settings.apply_env(|k| std::env::var(k).ok());
        Ok(settings)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_DEBUG) {
            self.debug = truthy(&v);
        }
        if let Some(v) = lookup(ENV_DATABASE_URL) {
            self.database_url = v;
        }
        if let Some(v) = lookup(ENV_BIND) {
            self.bind = v;
        }
        if let Some(v) = lookup(ENV_MODELS) {
            self.models_path = Some(PathBuf::from(v));
        }
    }

    pub fn value(&self, key: &str) -> Option<&Json> {
        self.extra.get(key)
    }
}

static SETTINGS: Lazy<RwLock<Arc<Settings>>> = Lazy::new(|| RwLock::new(Arc::new(Settings::default())));

/// Install the settings for this process.
pub fn init(settings: Settings) {
    *SETTINGS.write() = Arc::new(settings);
}

pub fn get() -> Arc<Settings> {
    SETTINGS.read().clone()
}

/// Restores the previous settings when dropped.
#[must_use = "settings are restored when the guard is dropped"]
pub struct OverrideGuard {
    previous: Option<Arc<Settings>>,
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *SETTINGS.write() = previous;
        }
    }
}

/// Apply `edit` to a copy of the current settings until the guard drops.
pub fn override_settings(edit: impl FnOnce(&mut Settings)) -> OverrideGuard {
    let mut slot = SETTINGS.write();
    let previous = slot.clone();
    let mut next = (*previous).clone();
    edit(&mut next);
    *slot = Arc::new(next);
    OverrideGuard {
        previous: Some(previous),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn override_restores_on_drop() {
        let before = get().debug;
        {
            let _guard = override_settings(|s| {
                s.debug = !before;
                s.extra.insert("TEST".into(), Json::from(2));
            });
            assert_eq!(get().debug, !before);
            assert_eq!(get().value("TEST"), Some(&Json::from(2)));
        }
        assert_eq!(get().debug, before);
        assert!(get().value("TEST").is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut s: Settings = serde_json::from_str(r#"{"bind": "0.0.0.0:9000", "page_size": [20, 100], "TEAM": "x"}"#)
            .unwrap();
        assert_eq!(s.page_size, Some((20, 100)));
        assert_eq!(s.value("TEAM"), Some(&Json::from("x")));
        s.apply_env(|k| match k {
            ENV_DEBUG => Some("true".into()),
            ENV_BIND => Some("127.0.0.1:1".into()),
            _ => None,
        });
        assert!(s.debug);
        assert_eq!(s.bind, "127.0.0.1:1");
        assert_eq!(s.database_url, Settings::default().database_url);
    }
}
