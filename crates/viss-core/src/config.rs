//! Typed configuration registry with change notifications.
//!
//! Values are grouped; the subsystem reads group [`CONFIG_GROUP`]. The
//! registry is seeded with defaults, overlaid with environment variables of
//! the same name upper-cased, and finally with persisted values. Every `set`
//! that changes a value is published to subscribers as a [`ConfigChange`].
//!
//! Callers never cache settings: [`ConfigRegistry::settings`] returns a fresh
//! [`VectorSettings`] snapshot and is cheap enough to call per request.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use serde_json::{json, Value as JsonValue};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::defaults::{self, CONFIG_GROUP};
use crate::error::{Error, Result};

/// Key names in the `vector` group.
pub mod keys {
    pub const VECTOR_ENABLED: &str = "vector_enabled";
    pub const AUTO_PROCESSING_ENABLED: &str = "vector_auto_processing_enabled";
    pub const CONCURRENCY: &str = "vector_concurrency";
    pub const API_KEY: &str = "vector_api_key";
    pub const BASE_URL: &str = "vector_base_url";
    pub const MODEL: &str = "vector_model";
    pub const TIMEOUT: &str = "vector_timeout";
    pub const QDRANT_URL: &str = "qdrant_url";
    pub const QDRANT_TIMEOUT: &str = "qdrant_timeout";
    pub const SIMILARITY_THRESHOLD: &str = "vector_similarity_threshold";
    pub const SEARCH_THRESHOLD: &str = "vector_search_threshold";
    pub const MAX_RESULTS: &str = "vector_max_results";

    /// Every key the subsystem reads.
    pub const ALL: [&str; 12] = [
        VECTOR_ENABLED,
        AUTO_PROCESSING_ENABLED,
        CONCURRENCY,
        API_KEY,
        BASE_URL,
        MODEL,
        TIMEOUT,
        QDRANT_URL,
        QDRANT_TIMEOUT,
        SIMILARITY_THRESHOLD,
        SEARCH_THRESHOLD,
        MAX_RESULTS,
    ];

    /// Keys whose change reinitializes providers and schedules a reconciliation.
    pub const RELOAD: [&str; 5] = [VECTOR_ENABLED, API_KEY, BASE_URL, MODEL, QDRANT_URL];
}

/// A published change of one registry value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChange {
    pub group: String,
    pub key: String,
    pub old: Option<JsonValue>,
    pub new: JsonValue,
}

impl ConfigChange {
    pub fn matches(&self, group: &str, key: &str) -> bool {
        self.group == group && self.key == key
    }

    /// True for a `vector` group key that requires provider reinitialization.
    pub fn requires_reload(&self) -> bool {
        self.group == CONFIG_GROUP && keys::RELOAD.contains(&self.key.as_str())
    }
}

/// In-process registry of typed key/value settings.
pub struct ConfigRegistry {
    values: RwLock<HashMap<(String, String), JsonValue>>,
    changes: broadcast::Sender<ConfigChange>,
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigRegistry {
    /// Empty registry; getters fall back to their defaults.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            values: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Registry seeded with the `vector` group defaults.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for (key, value) in default_values() {
            registry.insert_silently(CONFIG_GROUP, key, value);
        }
        registry
    }

    /// Overlay values from environment variables named after the upper-cased key.
    ///
    /// | Variable | Key |
    /// |----------|-----|
    /// | `VECTOR_ENABLED` | `vector_enabled` |
    /// | `VECTOR_API_KEY` | `vector_api_key` |
    /// | `QDRANT_URL` | `qdrant_url` |
    /// | ... | ... |
    pub fn load_env(&self) {
        for key in keys::ALL {
            if let Ok(raw) = std::env::var(key.to_uppercase()) {
                debug!(key, "Config value loaded from environment");
                self.insert_silently(CONFIG_GROUP, key, parse_env_value(&raw));
            }
        }
    }

    /// Overlay persisted values without publishing changes.
    pub fn apply_persisted(&self, group: &str, entries: Vec<(String, JsonValue)>) {
        let count = entries.len();
        for (key, value) in entries {
            self.insert_silently(group, &key, value);
        }
        if count > 0 {
            info!(group, count, "Persisted config values applied");
        }
    }

    fn insert_silently(&self, group: &str, key: &str, value: JsonValue) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert((group.to_string(), key.to_string()), value);
    }

    /// Subscribe to every subsequent change.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }

    /// Set a value. Publishes a change and returns true when the value differs.
    pub fn set(&self, group: &str, key: &str, value: JsonValue) -> bool {
        let old = {
            let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
            let slot = (group.to_string(), key.to_string());
            if values.get(&slot) == Some(&value) {
                return false;
            }
            values.insert(slot, value.clone())
        };

        info!(group, key, "Config value changed");
        // No receivers is fine; nothing is listening yet.
        let _ = self.changes.send(ConfigChange {
            group: group.to_string(),
            key: key.to_string(),
            old,
            new: value,
        });
        true
    }

    /// Raw value.
    pub fn get(&self, group: &str, key: &str) -> Option<JsonValue> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(&(group.to_string(), key.to_string())).cloned()
    }

    pub fn get_bool(&self, group: &str, key: &str, default: bool) -> bool {
        match self.get(group, key) {
            Some(JsonValue::Bool(b)) => b,
            Some(JsonValue::Number(n)) => n.as_i64().map_or(default, |n| n != 0),
            Some(JsonValue::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => default,
            },
            _ => default,
        }
    }

    pub fn get_i64(&self, group: &str, key: &str, default: i64) -> i64 {
        match self.get(group, key) {
            Some(JsonValue::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(default),
            Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_f64(&self, group: &str, key: &str, default: f64) -> f64 {
        match self.get(group, key) {
            Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(default),
            Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_string(&self, group: &str, key: &str, default: &str) -> String {
        match self.get(group, key) {
            Some(JsonValue::String(s)) => s,
            Some(JsonValue::Null) | None => default.to_string(),
            Some(other) => other.to_string(),
        }
    }

    /// Fresh snapshot of the `vector` group.
    pub fn settings(&self) -> VectorSettings {
        let g = CONFIG_GROUP;
        let concurrency = self.get_i64(g, keys::CONCURRENCY, defaults::CONCURRENCY as i64);
        let max_results = self.get_i64(g, keys::MAX_RESULTS, defaults::MAX_RESULTS as i64);
        let timeout = self.get_i64(g, keys::TIMEOUT, defaults::EMBED_TIMEOUT_SECS as i64);
        let qdrant_timeout =
            self.get_i64(g, keys::QDRANT_TIMEOUT, defaults::QDRANT_TIMEOUT_SECS as i64);

        VectorSettings {
            enabled: self.get_bool(g, keys::VECTOR_ENABLED, defaults::VECTOR_ENABLED),
            auto_processing: self.get_bool(
                g,
                keys::AUTO_PROCESSING_ENABLED,
                defaults::AUTO_PROCESSING_ENABLED,
            ),
            concurrency: clamp_concurrency(concurrency),
            api_key: self.get_string(g, keys::API_KEY, "").trim().to_string(),
            base_url: normalize_base_url(&self.get_string(
                g,
                keys::BASE_URL,
                defaults::EMBED_BASE_URL,
            )),
            model: {
                let m = self.get_string(g, keys::MODEL, defaults::EMBED_MODEL);
                if m.trim().is_empty() {
                    defaults::EMBED_MODEL.to_string()
                } else {
                    m.trim().to_string()
                }
            },
            timeout: Duration::from_secs(timeout.max(1) as u64),
            qdrant_url: self
                .get_string(g, keys::QDRANT_URL, "")
                .trim()
                .trim_end_matches('/')
                .to_string(),
            qdrant_timeout: Duration::from_secs(qdrant_timeout.max(1) as u64),
            similarity_threshold: self.get_f64(
                g,
                keys::SIMILARITY_THRESHOLD,
                defaults::SIMILARITY_THRESHOLD,
            ),
            search_threshold: self.get_f64(g, keys::SEARCH_THRESHOLD, defaults::SEARCH_THRESHOLD),
            max_results: max_results.max(1) as usize,
        }
    }
}

/// Immutable snapshot of the `vector` group.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSettings {
    pub enabled: bool,
    pub auto_processing: bool,
    pub concurrency: usize,
    pub api_key: String,
    /// Always ends with `/v1`.
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    /// Empty when no vector store is configured.
    pub qdrant_url: String,
    pub qdrant_timeout: Duration,
    pub similarity_threshold: f64,
    pub search_threshold: f64,
    pub max_results: usize,
}

impl Default for VectorSettings {
    fn default() -> Self {
        ConfigRegistry::with_defaults().settings()
    }
}

impl VectorSettings {
    /// Fails unless the master switch is on and a credential is present.
    pub fn ensure_provider_ready(&self) -> Result<()> {
        if !self.enabled {
            return Err(Error::Config("vector service is disabled".to_string()));
        }
        if self.api_key.is_empty() {
            return Err(Error::Config("embedding API key is not configured".to_string()));
        }
        Ok(())
    }

    /// Fails unless the master switch is on and a vector store URL is present.
    pub fn ensure_store_ready(&self) -> Result<()> {
        if !self.enabled {
            return Err(Error::Config("vector service is disabled".to_string()));
        }
        if self.qdrant_url.is_empty() {
            return Err(Error::Config("vector store URL is not configured".to_string()));
        }
        Ok(())
    }
}

/// Ensure the embedding endpoint ends with `/v1`.
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return defaults::EMBED_BASE_URL.to_string();
    }
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

fn clamp_concurrency(n: i64) -> usize {
    if n < 0 {
        warn!(value = n, "Negative concurrency clamped to 0");
        return 0;
    }
    (n as usize).min(defaults::MAX_CONCURRENCY)
}

fn parse_env_value(raw: &str) -> JsonValue {
    let trimmed = raw.trim();
    serde_json::from_str::<JsonValue>(trimmed)
        .ok()
        .filter(|v| !v.is_object() && !v.is_array())
        .unwrap_or_else(|| JsonValue::String(trimmed.to_string()))
}

fn default_values() -> Vec<(&'static str, JsonValue)> {
    vec![
        (keys::VECTOR_ENABLED, json!(defaults::VECTOR_ENABLED)),
        (
            keys::AUTO_PROCESSING_ENABLED,
            json!(defaults::AUTO_PROCESSING_ENABLED),
        ),
        (keys::CONCURRENCY, json!(defaults::CONCURRENCY)),
        (keys::API_KEY, json!("")),
        (keys::BASE_URL, json!(defaults::EMBED_BASE_URL)),
        (keys::MODEL, json!(defaults::EMBED_MODEL)),
        (keys::TIMEOUT, json!(defaults::EMBED_TIMEOUT_SECS)),
        (keys::QDRANT_URL, json!("")),
        (keys::QDRANT_TIMEOUT, json!(defaults::QDRANT_TIMEOUT_SECS)),
        (
            keys::SIMILARITY_THRESHOLD,
            json!(defaults::SIMILARITY_THRESHOLD),
        ),
        (keys::SEARCH_THRESHOLD, json!(defaults::SEARCH_THRESHOLD)),
        (keys::MAX_RESULTS, json!(defaults::MAX_RESULTS)),
    ]
}
