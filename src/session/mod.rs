//! Unit of work over a [`DataSource`]: creates, loads, saves and deletes
//! tracked proxies and keeps one identity cache per entity.

mod builder;

pub use builder::SessionBuilder;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{Instrument, debug, info_span};

use crate::cache::IdentityCache;
use crate::config::OrmConfig;
use crate::core::{OrmError, Result, Value};
use crate::proxy::{Entity, EntityRegistry, ProxyRef, ProxyType, ValueBag};
use crate::source::{DataSource, FetchRequest};

/// What [`Session::save`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The proxy was new; carries the identity it received.
    Inserted(Value),
    /// Only these fields were written.
    Updated(Vec<String>),
    Unchanged,
}

enum SavePlan {
    Insert(Vec<(usize, Value)>),
    Update {
        key: Value,
        changes: Vec<(usize, Value)>,
    },
    Unchanged,
}

/// Cheap to clone; all clones share the registry, the caches and the source.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    registry: EntityRegistry,
    source: Arc<dyn DataSource>,
    config: OrmConfig,
    caches: HashMap<String, IdentityCache<Value, ValueBag>>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &OrmConfig {
        &self.inner.config
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.inner.source
    }

    /// Identity cache of `entity`, absent when caching is disabled.
    pub fn cache(&self, entity: &str) -> Option<&IdentityCache<Value, ValueBag>> {
        self.inner.caches.get(&entity.to_ascii_lowercase())
    }

    /// A new tracked proxy over `T::default()` with defaults applied.
    pub fn create<T: Entity>(&self) -> Result<ProxyRef<T>> {
        self.create_from(T::default())
    }

    /// A new tracked proxy over `entity`. Defaults apply only to fields that
    /// still equal their `T::default()` value.
    pub fn create_from<T: Entity>(&self, entity: T) -> Result<ProxyRef<T>> {
        let proxy_type = self.inner.registry.get::<T>()?;
        ProxyRef::build(proxy_type, entity, Some(self.clone()), true)
    }

    fn materialize<T: Entity>(&self, proxy_type: &Arc<ProxyType>, bag: &ValueBag) -> Result<ProxyRef<T>> {
        let handle = ProxyRef::build(Arc::clone(proxy_type), T::default(), Some(self.clone()), false)?;
        handle.write()?.from_bag(bag)?;
        Ok(handle)
    }

    fn remember(&self, proxy_type: &ProxyType, bag: &ValueBag) {
        let Some(cache) = self.cache(proxy_type.entity()) else {
            return;
        };
        let key = bag.get(&proxy_type.key_field().name).cloned().unwrap_or_default();
        if !key.is_unassigned_identity() {
            cache.add_or_update(key, bag.clone(), |_, fresh| fresh);
        }
    }

    /// Loads by primary key: the identity cache first, then the source.
    pub async fn load<T: Entity>(&self, id: impl Into<Value>) -> Result<Option<ProxyRef<T>>> {
        let id = id.into();
        let span = info_span!("load", entity = T::NAME, id = %id);
        self.load_by_key::<T>(id).instrument(span).await
    }

    async fn load_by_key<T: Entity>(&self, id: Value) -> Result<Option<ProxyRef<T>>> {
        let proxy_type = self.inner.registry.get::<T>()?;

        if let Some(cache) = self.cache(proxy_type.entity()) {
            if cache.contains_key(&id) {
                if let Some(bag) = cache.get_values(&id) {
                    debug!("identity cache hit");
                    return self.materialize(&proxy_type, &bag).map(Some);
                }
            }
            debug!("identity cache miss");
        }

        let request = FetchRequest::new(proxy_type.entity(), proxy_type.columns().to_vec())
            .filter(proxy_type.key_field().name.clone(), id);
        let rows = self.inner.source.fetch(&request).await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let bag = ValueBag::from_row(&proxy_type, row)?;
        self.remember(&proxy_type, &bag);
        self.materialize(&proxy_type, &bag).map(Some)
    }

    /// Loads every row whose `field` equals `value`. Results feed the cache.
    pub async fn load_where<T: Entity>(&self, field: &str, value: impl Into<Value>) -> Result<Vec<ProxyRef<T>>> {
        let value = value.into();
        let span = info_span!("load_where", entity = T::NAME, field, value = %value);
        async move {
            let proxy_type = self.inner.registry.get::<T>()?;
            let column = proxy_type.fields()[proxy_type.require_index(field)?].name.clone();

            let request =
                FetchRequest::new(proxy_type.entity(), proxy_type.columns().to_vec()).filter(column, value);
            let rows = self.inner.source.fetch(&request).await?;
            debug!(rows = rows.len(), "rows fetched");

            let mut loaded = Vec::with_capacity(rows.len());
            for row in rows {
                let bag = ValueBag::from_row(&proxy_type, row)?;
                self.remember(&proxy_type, &bag);
                loaded.push(self.materialize(&proxy_type, &bag)?);
            }
            Ok(loaded)
        }
        .instrument(span)
        .await
    }

    /// Validates, then inserts a new proxy or writes only its changed fields.
    ///
    /// The proxy lock is released while the source works. Afterwards a new
    /// proxy stores its identity and the written values become the snapshot;
    /// wired dependents are updated once the proxy is unlocked again.
    pub async fn save<T: Entity>(&self, handle: &ProxyRef<T>) -> Result<SaveOutcome> {
        let span = info_span!("save", entity = T::NAME);
        self.save_proxy(handle).instrument(span).await
    }

    async fn save_proxy<T: Entity>(&self, handle: &ProxyRef<T>) -> Result<SaveOutcome> {
        let proxy_type = self.inner.registry.get::<T>()?;
        let key_index = proxy_type.key_index();
        let key_name = proxy_type.key_field().name.clone();

        let plan = {
            let mut proxy = handle.write()?;
            if self.inner.config.validate_on_save {
                proxy.validate()?;
            }
            if proxy.is_new() {
                let key = proxy.primary_key();
                let values = (0..proxy_type.fields().len())
                    .filter(|i| !(*i == key_index && key.is_unassigned_identity()))
                    .map(|i| (i, proxy.value_at(i)))
                    .collect();
                SavePlan::Insert(values)
            } else if !proxy.has_changes() {
                SavePlan::Unchanged
            } else {
                let changes = proxy
                    .changed_fields()
                    .iter()
                    .filter_map(|name| proxy_type.index_of(name))
                    .map(|i| (i, proxy.value_at(i)))
                    .collect();
                SavePlan::Update {
                    key: proxy.primary_key(),
                    changes,
                }
            }
        };

        match plan {
            SavePlan::Unchanged => {
                debug!("nothing to save");
                Ok(SaveOutcome::Unchanged)
            }
            SavePlan::Insert(values) => {
                let named = named_values(&proxy_type, &values);
                let key = self
                    .inner
                    .source
                    .insert(proxy_type.entity(), &named, &key_name)
                    .await?;

                let bag = {
                    let mut proxy = handle.write()?;
                    proxy.store_key_unpublished(key.clone())?;
                    let mut written = values;
                    written.push((key_index, key.clone()));
                    proxy.accept_written(written);
                    proxy.mark_saved();
                    proxy.to_bag()
                };
                // Dependents take their own locks; the saved proxy is unlocked.
                handle.identity().publish(key.clone());
                self.remember(&proxy_type, &bag);
                debug!(key = %key, "inserted");
                Ok(SaveOutcome::Inserted(key))
            }
            SavePlan::Update { key, changes } => {
                let named = named_values(&proxy_type, &changes);
                let hit = self
                    .inner
                    .source
                    .update(proxy_type.entity(), &key_name, &key, &named)
                    .await?;
                if hit == 0 {
                    return Err(OrmError::Source(format!(
                        "no '{}' row with key {}",
                        proxy_type.entity(),
                        key
                    )));
                }

                let bag = {
                    let mut proxy = handle.write()?;
                    proxy.accept_written(changes);
                    proxy.to_bag()
                };
                self.remember(&proxy_type, &bag);
                let fields: Vec<String> = named.into_iter().map(|(name, _)| name).collect();
                debug!(key = %key, fields = ?fields, "updated");
                Ok(SaveOutcome::Updated(fields))
            }
        }
    }

    /// Deletes the proxy's row and its cache entry. Returns the rows removed.
    pub async fn delete<T: Entity>(&self, handle: &ProxyRef<T>) -> Result<u64> {
        let proxy_type = self.inner.registry.get::<T>()?;
        let key = {
            let proxy = handle.read()?;
            if proxy.is_new() {
                return Err(OrmError::NotPersisted(T::NAME.to_string()));
            }
            proxy.primary_key()
        };

        let removed = self
            .inner
            .source
            .delete(proxy_type.entity(), &proxy_type.key_field().name, &key)
            .await?;
        self.invalidate::<T>(key.clone());
        debug!(entity = T::NAME, key = %key, removed, "deleted");
        Ok(removed)
    }

    /// Drops one cached entry. Returns whether it was cached.
    pub fn invalidate<T: Entity>(&self, id: impl Into<Value>) -> bool {
        self.cache(T::NAME)
            .and_then(|cache| cache.remove_item_by_key(&id.into()))
            .is_some()
    }

    pub fn clear_cache(&self) {
        for cache in self.inner.caches.values() {
            cache.clear();
        }
    }
}

fn named_values(proxy_type: &ProxyType, values: &[(usize, Value)]) -> Vec<(String, Value)> {
    values
        .iter()
        .filter_map(|(i, v)| proxy_type.field(*i).map(|f| (f.name.clone(), v.clone())))
        .collect()
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("entities", &self.inner.registry.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
