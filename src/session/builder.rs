use std::collections::HashMap;
use std::sync::Arc;

use super::{Session, SessionInner};
use crate::cache::IdentityCache;
use crate::config::OrmConfig;
use crate::core::{OrmError, Result};
use crate::proxy::{Entity, EntityRegistry, EntityRegistryBuilder};
use crate::source::DataSource;

/// Assembles a [`Session`]: configuration, data source and entity types.
///
/// ```ignore
/// let session = Session::builder()
///     .source(Arc::new(MemorySource::new()))
///     .register::<Customer>()
///     .register::<Order>()
///     .build()?;
/// ```
#[derive(Default)]
pub struct SessionBuilder {
    config: OrmConfig,
    source: Option<Arc<dyn DataSource>>,
    entities: EntityRegistryBuilder,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: OrmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn source<S: DataSource + 'static>(mut self, source: Arc<S>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn shared_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn register<T: Entity>(mut self) -> Self {
        self.entities = self.entities.register::<T>();
        self
    }

    pub fn build(self) -> Result<Session> {
        self.config.validate()?;
        let source = self
            .source
            .ok_or_else(|| OrmError::Config("a session needs a data source".to_string()))?;
        let registry: EntityRegistry = self.entities.build()?;

        let mut caches = HashMap::new();
        if self.config.cache_enabled {
            for entity in registry.entity_names() {
                let limits = self.config.limits_for(entity);
                caches.insert(
                    entity.to_ascii_lowercase(),
                    IdentityCache::new(limits.max_age, limits.max_items),
                );
            }
        }

        Ok(Session {
            inner: Arc::new(SessionInner {
                registry,
                source,
                config: self.config,
                caches,
            }),
        })
    }
}
