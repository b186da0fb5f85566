use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{OrmError, Result};

/// Bounds of one identity cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Entries older than this (by load time) are treated as absent.
    pub max_age: Duration,
    /// Capacity; `0` means unbounded.
    pub max_items: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(15 * 60),
            max_items: 1000,
        }
    }
}

impl CacheLimits {
    pub fn new(max_age: Duration, max_items: usize) -> Self {
        Self { max_age, max_items }
    }
}

/// Runtime configuration of a [`crate::Session`].
///
/// Built with consuming setters or read from JSON:
///
/// ```ignore
/// let config = OrmConfig::from_json(r#"{
///     "cache_max_age_ms": 60000,
///     "entities": { "Order": { "max_items": 50 } }
/// }"#)?;
/// ```
#[derive(Debug, Clone)]
pub struct OrmConfig {
    /// Consult and feed the identity caches on load and save.
    pub cache_enabled: bool,

    /// Limits for every entity without an override.
    pub cache_limits: CacheLimits,

    /// Per-entity overrides, keyed by lowercase entity name.
    pub entity_limits: HashMap<String, CacheLimits>,

    /// Reject saves of invalid proxies before anything is written.
    pub validate_on_save: bool,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_limits: CacheLimits::default(),
            entity_limits: HashMap::new(),
            validate_on_save: true,
        }
    }
}

impl OrmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.cache_limits.max_age = max_age;
        self
    }

    pub fn max_items(mut self, max_items: usize) -> Self {
        self.cache_limits.max_items = max_items;
        self
    }

    /// Overrides the cache limits of one entity.
    pub fn entity_limits(mut self, entity: &str, limits: CacheLimits) -> Self {
        self.entity_limits.insert(entity.to_ascii_lowercase(), limits);
        self
    }

    pub fn validate_on_save(mut self, validate: bool) -> Self {
        self.validate_on_save = validate;
        self
    }

    /// Effective limits for `entity`.
    pub fn limits_for(&self, entity: &str) -> CacheLimits {
        self.entity_limits
            .get(&entity.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.cache_limits)
    }

    /// Parses a JSON document. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;
        let defaults = CacheLimits::default();
        let base = CacheLimits {
            max_age: raw
                .cache_max_age_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_age),
            max_items: raw.cache_max_items.unwrap_or(defaults.max_items),
        };

        let mut config = Self::default().max_age(base.max_age).max_items(base.max_items);
        if let Some(enabled) = raw.cache_enabled {
            config = config.cache_enabled(enabled);
        }
        if let Some(validate) = raw.validate_on_save {
            config = config.validate_on_save(validate);
        }
        for (entity, limits) in raw.entities {
            let limits = CacheLimits {
                max_age: limits
                    .max_age_ms
                    .map(Duration::from_millis)
                    .unwrap_or(base.max_age),
                max_items: limits.max_items.unwrap_or(base.max_items),
            };
            config = config.entity_limits(&entity, limits);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_limits.max_age.is_zero() {
            return Err(OrmError::Config("cache max_age must be > 0".to_string()));
        }
        for (entity, limits) in &self.entity_limits {
            if limits.max_age.is_zero() {
                return Err(OrmError::Config(format!(
                    "cache max_age for '{}' must be > 0",
                    entity
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    cache_enabled: Option<bool>,
    cache_max_age_ms: Option<u64>,
    cache_max_items: Option<usize>,
    validate_on_save: Option<bool>,
    entities: HashMap<String, RawLimits>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawLimits {
    max_age_ms: Option<u64>,
    max_items: Option<usize>,
}
