use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use super::accessor::Entity;
use super::entity_proxy::Proxy;
use super::synthesis::ProxyType;
use crate::core::{OrmError, Result, Value};
use crate::relation::identity::IdentityCell;
use crate::session::Session;

/// Shared handle to a proxy.
///
/// Cloning is cheap and every clone sees the same proxy. The identity cell is
/// kept beside the lock, so reading the key, comparing and hashing handles
/// never lock the proxy.
pub struct ProxyRef<T: Entity> {
    inner: Arc<RwLock<Proxy<T>>>,
    identity: Arc<IdentityCell>,
}

impl<T: Entity> ProxyRef<T> {
    /// Wraps `entity`, applies defaults and takes the first snapshot.
    pub(crate) fn build(
        proxy_type: Arc<ProxyType>,
        entity: T,
        session: Option<Session>,
        is_new: bool,
    ) -> Result<Self> {
        let identity = IdentityCell::new(Value::Null);
        let inner = Arc::new_cyclic(|this| {
            RwLock::new(Proxy::new(
                proxy_type,
                entity,
                this.clone(),
                Arc::clone(&identity),
                session,
                is_new,
            ))
        });
        let handle = Self { inner, identity };
        handle.write()?.initialize()?;
        Ok(handle)
    }

    /// A proxy outside any session. Lazy loading is unavailable on it.
    pub fn detached(proxy_type: Arc<ProxyType>, entity: T) -> Result<Self> {
        Self::build(proxy_type, entity, None, true)
    }

    pub(crate) fn from_parts(inner: Arc<RwLock<Proxy<T>>>, identity: Arc<IdentityCell>) -> Self {
        Self { inner, identity }
    }

    pub(crate) fn inner(&self) -> &Arc<RwLock<Proxy<T>>> {
        &self.inner
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Proxy<T>>> {
        Ok(self.inner.read()?)
    }

    /// Read access if no writer holds the proxy right now.
    pub fn try_read(&self) -> Result<Option<RwLockReadGuard<'_, Proxy<T>>>> {
        match self.inner.try_read() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(err)) => Err(OrmError::from(err)),
        }
    }

    /// Write access. Setting the primary key through this guard notifies
    /// dependents, which takes their locks; do not hold a dependent's guard
    /// on the same thread meanwhile.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, Proxy<T>>> {
        Ok(self.inner.write()?)
    }

    pub fn identity(&self) -> &Arc<IdentityCell> {
        &self.identity
    }

    /// Current primary key, read without locking the proxy.
    pub fn primary_key(&self) -> Value {
        self.identity.current()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Entity> Clone for ProxyRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            identity: Arc::clone(&self.identity),
        }
    }
}

/// Same proxy, or both keys assigned and equal.
impl<T: Entity> PartialEq for ProxyRef<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let (a, b) = (self.primary_key(), other.primary_key());
        !a.is_unassigned_identity() && !b.is_unassigned_identity() && a == b
    }
}

impl<T: Entity> Eq for ProxyRef<T> {}

/// Hashes the key, so a handle must not change key while inside a hashed
/// collection.
impl<T: Entity> Hash for ProxyRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        T::NAME.hash(state);
        self.primary_key().hash(state);
    }
}

impl<T: Entity> fmt::Debug for ProxyRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRef")
            .field("entity", &T::NAME)
            .field("key", &self.primary_key())
            .finish()
    }
}
