//! Lazy relation loading.
//!
//! Each load reads what it needs under the proxy's read lock, releases it for
//! the query, and takes the write lock to store the result. A relation is
//! marked loaded only after the query succeeded, so a failed load is retried
//! by the next read.

use tracing::debug;

use crate::core::{OrmError, Result};
use crate::proxy::{Entity, ProxyRef};
use crate::schema::RelationKind;
use crate::session::Session;

fn session_of<T: Entity>(session: Option<&Session>, relation: &str) -> Result<Session> {
    session.cloned().ok_or_else(|| {
        OrmError::Relation(format!(
            "'{}.{}' cannot be loaded outside a session",
            T::NAME,
            relation
        ))
    })
}

impl<T: Entity> ProxyRef<T> {
    /// Returns the referenced proxy, querying it on first read.
    ///
    /// No query runs when the reference is already assigned, was marked
    /// loaded, or its foreign key is null.
    pub async fn load_reference<P: Entity>(&self, name: &str) -> Result<Option<ProxyRef<P>>> {
        let (r, key_field, key, session) = {
            let proxy = self.read()?;
            let r = proxy.relation_of(name, RelationKind::ReferenceOne, P::NAME)?;
            if let Some(target) = proxy.reference_at::<P>(r)? {
                return Ok(Some(target));
            }
            let binding = &proxy.proxy_type().relations()[r];
            if proxy.tracker.is_item_loaded(&binding.name) {
                return Ok(None);
            }
            let key_field = binding
                .key_field
                .ok_or_else(|| OrmError::Relation(format!("'{}' has no foreign key", binding.name)))?;
            let key = proxy.value_at(key_field);
            if key.is_null() {
                return Ok(None);
            }
            (r, key_field, key, session_of::<T>(proxy.session(), name)?)
        };

        debug!(entity = T::NAME, relation = name, key = %key, "lazy reference load");
        let loaded = session.load::<P>(key.clone()).await?;

        let mut proxy = self.write()?;
        if let Some(target) = proxy.reference_at::<P>(r)? {
            return Ok(Some(target));
        }
        // The key moved while the query ran; the result belongs to nobody.
        if proxy.value_at(key_field) != key {
            return Ok(loaded);
        }
        match &loaded {
            Some(target) => proxy.wire_reference(r, Some(target))?,
            None => proxy.mark_reference_missing(r, key)?,
        }
        Ok(loaded)
    }

    /// Returns the items of a collection, querying them on first read.
    ///
    /// A proxy that was never saved cannot have stored children and resolves
    /// to an empty list without a query (and without being marked loaded).
    pub async fn load_collection<C: Entity>(&self, name: &str) -> Result<Vec<ProxyRef<C>>> {
        let (r, back_reference, key, session) = {
            let proxy = self.read()?;
            let r = proxy.relation_of(name, RelationKind::ReferenceMany, C::NAME)?;
            if let Some(items) = proxy.collection_at::<C>(r)? {
                return Ok(items);
            }
            let binding = &proxy.proxy_type().relations()[r];
            if proxy.tracker.is_collection_loaded(&binding.name) || proxy.is_new() {
                return Ok(Vec::new());
            }
            let back_reference = binding.foreign_key.clone();
            (r, back_reference, proxy.primary_key(), session_of::<T>(proxy.session(), name)?)
        };

        debug!(entity = T::NAME, relation = name, key = %key, "lazy collection load");
        let items = session.load_where::<C>(&back_reference, key).await?;

        let mut proxy = self.write()?;
        if let Some(existing) = proxy.collection_at::<C>(r)? {
            return Ok(existing);
        }
        proxy.store_collection(r, items.clone())?;
        Ok(items)
    }
}
