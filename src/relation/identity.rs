//! Identity-assigned notifications between proxies.
//!
//! Every proxy owns an [`IdentityCell`] holding its current primary key. A
//! dependent that references the proxy subscribes to the cell and keeps the
//! returned [`Subscription`]; dropping the token unsubscribes. The cell lives
//! outside the proxy lock, so reading a key or subscribing never waits on the
//! referenced proxy.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use crate::core::Value;

pub type SubscriptionId = u64;

type Callback = Arc<dyn Fn(SubscriptionId, &Value) + Send + Sync>;

pub struct IdentityCell {
    current: Mutex<Value>,
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
    next_id: AtomicU64,
}

impl IdentityCell {
    pub fn new(initial: Value) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(initial),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn current_guard(&self) -> MutexGuard<'_, Value> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribers_guard(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Callback)>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Value {
        self.current_guard().clone()
    }

    /// Registers `callback`, invoked with the new key every time a different
    /// key is published.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(SubscriptionId, &Value) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers_guard().push((id, Arc::new(callback)));
        debug!(subscription = id, "identity subscription added");
        Subscription {
            cell: Arc::downgrade(self),
            id,
        }
    }

    /// Stores `value` and notifies subscribers when it differs from the
    /// current key. Returns whether anything changed.
    ///
    /// Callbacks run after both internal locks are released, on a snapshot of
    /// the subscriber list.
    pub fn publish(&self, value: Value) -> bool {
        {
            let mut current = self.current_guard();
            if *current == value {
                return false;
            }
            *current = value.clone();
        }

        let callbacks: Vec<(SubscriptionId, Callback)> = self.subscribers_guard().clone();
        for (id, callback) in callbacks {
            callback(id, &value);
        }
        true
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers_guard().len()
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers_guard().retain(|(sid, _)| *sid != id);
    }
}

impl fmt::Debug for IdentityCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCell")
            .field("current", &self.current())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Registration token for one identity subscription. Dropping it
/// unsubscribes.
pub struct Subscription {
    cell: Weak<IdentityCell>,
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[cfg(test)]
    pub(crate) fn is_on(&self, cell: &Arc<IdentityCell>) -> bool {
        std::ptr::eq(self.cell.as_ptr(), Arc::as_ptr(cell))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.upgrade() {
            cell.unsubscribe(self.id);
            debug!(subscription = self.id, "identity subscription removed");
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn test_publish_notifies_only_on_change() {
        let cell = IdentityCell::new(Value::Null);
        let seen = Arc::new(AtomicI64::new(0));
        let calls = Arc::new(AtomicU64::new(0));

        let (s, c) = (Arc::clone(&seen), Arc::clone(&calls));
        let _sub = cell.subscribe(move |_, value| {
            s.store(value.as_i64().unwrap_or(-1), Ordering::SeqCst);
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(cell.publish(Value::Integer(42)));
        assert!(!cell.publish(Value::Integer(42)));
        assert_eq!(seen.load(Ordering::SeqCst), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cell.current(), Value::Integer(42));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let cell = IdentityCell::new(Value::Null);
        let sub = cell.subscribe(|_, _| {});
        assert_eq!(cell.subscriber_count(), 1);
        assert!(sub.is_on(&cell));
        drop(sub);
        assert_eq!(cell.subscriber_count(), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let cell = IdentityCell::new(Value::Null);
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let sub = cell.subscribe(move |_, _| {
            inner.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        cell.publish(Value::Integer(1));
        assert_eq!(cell.subscriber_count(), 0);
    }

    #[test]
    fn test_token_outliving_cell_is_harmless() {
        let cell = IdentityCell::new(Value::Null);
        let sub = cell.subscribe(|_, _| {});
        drop(cell);
        drop(sub);
    }
}
