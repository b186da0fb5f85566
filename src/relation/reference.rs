//! Relation slots of a proxy and the synchronizer that keeps reference keys
//! in step with the referenced proxy's identity.
//!
//! A reference moves `Unset -> Wired` when a target is assigned, and
//! `Wired -> ConfirmedIdentity` each time the target publishes a new key.
//! Clearing or detaching returns it to `Unset` and drops the subscription.

use std::any::Any;
use std::sync::{Arc, RwLock, Weak};

use tracing::{debug, warn};

use super::identity::{IdentityCell, Subscription, SubscriptionId};
use crate::core::{OrmError, Result, Value};
use crate::proxy::{Entity, Proxy, ProxyRef};
use crate::schema::RelationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceState {
    #[default]
    Unset,
    Wired,
    ConfirmedIdentity,
}

pub(crate) enum ReferenceTarget {
    Other {
        handle: Box<dyn Any + Send + Sync>,
        identity: Arc<IdentityCell>,
    },
    /// The proxy references itself. Held without a handle or subscription;
    /// the key setter updates the foreign key inline.
    SelfLoop,
}

#[derive(Default)]
pub(crate) struct ReferenceSlot {
    pub(crate) target: Option<ReferenceTarget>,
    pub(crate) subscription: Option<Subscription>,
    pub(crate) state: ReferenceState,
    /// Foreign key a lazy load found no row for.
    pub(crate) missing_key: Option<Value>,
}

impl ReferenceSlot {
    fn detach(&mut self) {
        self.subscription = None;
        self.target = None;
        self.state = ReferenceState::Unset;
        self.missing_key = None;
    }
}

#[derive(Default)]
pub(crate) struct CollectionSlot {
    pub(crate) items: Option<Box<dyn Any + Send + Sync>>,
}

pub(crate) enum RelationSlot {
    One(ReferenceSlot),
    Many(CollectionSlot),
}

impl RelationSlot {
    pub(crate) fn for_kind(kind: RelationKind) -> Self {
        match kind {
            RelationKind::ReferenceMany => Self::Many(CollectionSlot::default()),
            _ => Self::One(ReferenceSlot::default()),
        }
    }
}

fn identity_callback<T: Entity>(
    owner: Weak<RwLock<Proxy<T>>>,
    relation: usize,
) -> impl Fn(SubscriptionId, &Value) + Send + Sync + 'static {
    move |subscription, key| {
        let Some(owner) = owner.upgrade() else {
            warn!(entity = T::NAME, relation, "identity notification for a dropped dependent");
            return;
        };
        let mut proxy = match owner.write() {
            Ok(proxy) => proxy,
            Err(_) => {
                warn!(entity = T::NAME, relation, "identity notification for a poisoned dependent");
                return;
            }
        };
        if let Err(err) = proxy.apply_identity(relation, subscription, key) {
            warn!(entity = T::NAME, relation, error = %err, "identity notification rejected");
        }
    }
}

impl<T: Entity> Proxy<T> {
    /// Resolves a relation by name and checks its kind and target entity.
    pub(crate) fn relation_of(&self, name: &str, kind: RelationKind, target: &str) -> Result<usize> {
        let r = self
            .proxy_type
            .relation_index_of(name)
            .ok_or_else(|| OrmError::UnknownField(name.to_string(), self.entity_name().to_string()))?;
        let binding = &self.proxy_type.relations()[r];
        if binding.kind != kind {
            return Err(OrmError::Relation(format!(
                "'{}.{}' is a {:?}, not a {:?}",
                self.entity_name(),
                binding.name,
                binding.kind,
                kind
            )));
        }
        if !binding.target.eq_ignore_ascii_case(target) {
            return Err(OrmError::Relation(format!(
                "'{}.{}' targets '{}', not '{}'",
                self.entity_name(),
                binding.name,
                binding.target,
                target
            )));
        }
        Ok(r)
    }

    fn reference_slot(&self, r: usize) -> Result<&ReferenceSlot> {
        match self.relations.get(r) {
            Some(RelationSlot::One(slot)) => Ok(slot),
            _ => Err(OrmError::Relation(format!("relation #{} is not a reference", r))),
        }
    }

    fn reference_slot_mut(&mut self, r: usize) -> Result<&mut ReferenceSlot> {
        match self.relations.get_mut(r) {
            Some(RelationSlot::One(slot)) => Ok(slot),
            _ => Err(OrmError::Relation(format!("relation #{} is not a reference", r))),
        }
    }

    fn collection_slot_mut(&mut self, r: usize) -> Result<&mut CollectionSlot> {
        match self.relations.get_mut(r) {
            Some(RelationSlot::Many(slot)) => Ok(slot),
            _ => Err(OrmError::Relation(format!("relation #{} is not a collection", r))),
        }
    }

    fn key_field_of(&self, r: usize) -> Result<usize> {
        self.proxy_type
            .relation(r)
            .and_then(|b| b.key_field)
            .ok_or_else(|| OrmError::Relation(format!("relation #{} has no foreign key", r)))
    }

    fn relation_name(&self, r: usize) -> String {
        self.proxy_type
            .relation(r)
            .map(|b| b.name.clone())
            .unwrap_or_default()
    }

    /// Assigns (or clears) a `ReferenceOne` relation.
    ///
    /// The foreign key takes the target's current key, even an unassigned
    /// one, and follows every key the target publishes afterwards. The caller
    /// must not hold the target's lock when the target's key is later set
    /// from another thread.
    pub fn set_reference<P: Entity>(&mut self, name: &str, target: Option<&ProxyRef<P>>) -> Result<()> {
        let r = self.relation_of(name, RelationKind::ReferenceOne, P::NAME)?;
        self.wire_reference(r, target)
    }

    pub(crate) fn wire_reference<P: Entity>(&mut self, r: usize, target: Option<&ProxyRef<P>>) -> Result<()> {
        let key_field = self.key_field_of(r)?;
        let name = self.relation_name(r);

        let is_self = target.is_some_and(|t| std::ptr::addr_eq(Arc::as_ptr(t.inner()), self.this.as_ptr()));
        let key = match target {
            None => Value::Null,
            Some(_) if is_self => self.primary_key(),
            Some(t) => t.primary_key(),
        };
        self.check_assignable(key_field, &key)?;

        self.reference_slot_mut(r)?.detach();

        match target {
            None => {
                self.write_slot(key_field, Value::Null)?;
            }
            Some(_) if is_self => {
                let slot = self.reference_slot_mut(r)?;
                slot.target = Some(ReferenceTarget::SelfLoop);
                slot.state = ReferenceState::Wired;
                self.write_slot(key_field, key)?;
            }
            Some(t) => {
                let identity = Arc::clone(t.identity());
                let slot = self.reference_slot_mut(r)?;
                slot.target = Some(ReferenceTarget::Other {
                    handle: Box::new(t.clone()),
                    identity: Arc::clone(&identity),
                });
                slot.state = ReferenceState::Wired;
                self.write_slot(key_field, key)?;

                let subscription = identity.subscribe(identity_callback(self.this.clone(), r));
                self.reference_slot_mut(r)?.subscription = Some(subscription);
            }
        }

        // A cleared reference has nothing loaded; a null key never queries.
        if target.is_some() {
            self.tracker.add_loaded_item(&name);
        } else {
            self.tracker.forget_loaded_item(&name);
        }
        debug!(entity = self.entity_name(), relation = %name, wired = target.is_some(), "reference assigned");
        Ok(())
    }

    /// Runs on the dependent when a referenced proxy publishes a new key.
    pub(crate) fn apply_identity(&mut self, r: usize, subscription: SubscriptionId, key: &Value) -> Result<()> {
        let current = self
            .reference_slot(r)?
            .subscription
            .as_ref()
            .map(Subscription::id);
        if current != Some(subscription) {
            return Ok(());
        }

        let key_field = self.key_field_of(r)?;
        self.write_slot(key_field, key.clone())?;
        self.reference_slot_mut(r)?.state = ReferenceState::ConfirmedIdentity;
        debug!(entity = self.entity_name(), relation = r, key = %key, "foreign key follows new identity");
        Ok(())
    }

    /// Key hook: self references follow inline, then every subscriber is
    /// notified.
    pub(crate) fn on_key_written(&mut self, key: Value) -> Result<()> {
        let key_index = self.proxy_type.key_index();
        let self_loops: Vec<(usize, usize)> = self
            .relations
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                matches!(slot, RelationSlot::One(ReferenceSlot { target: Some(ReferenceTarget::SelfLoop), .. }))
            })
            .filter_map(|(r, _)| self.key_field_of(r).ok().map(|k| (r, k)))
            .filter(|(_, k)| *k != key_index)
            .collect();

        for (r, key_field) in self_loops {
            self.write_slot(key_field, key.clone())?;
            self.reference_slot_mut(r)?.state = ReferenceState::ConfirmedIdentity;
        }

        if !self.defer_publish {
            self.identity.publish(key);
        }
        Ok(())
    }

    /// Foreign-key hook: a key that no longer matches the wired target, or
    /// the key a load found missing, forgets the loaded state so the next
    /// read queries the new key.
    pub(crate) fn on_foreign_key_written(&mut self, r: usize, key: &Value) {
        let own_key = self.primary_key();
        let Ok(slot) = self.reference_slot_mut(r) else {
            return;
        };
        let expected = match &slot.target {
            None => match slot.missing_key.take() {
                Some(missing) if missing == *key => {
                    slot.missing_key = Some(missing);
                    return;
                }
                Some(_) => None,
                None => return,
            },
            Some(ReferenceTarget::SelfLoop) => Some(own_key),
            Some(ReferenceTarget::Other { identity, .. }) => Some(identity.current()),
        };
        if expected.as_ref() == Some(key) {
            return;
        }

        slot.detach();
        let name = self.relation_name(r);
        self.tracker.forget_loaded_item(&name);
        debug!(entity = self.entity_name(), relation = %name, "reference reset by foreign key write");
    }

    /// Records that the row behind `key` does not exist, so reads skip the
    /// query until the foreign key changes.
    pub(crate) fn mark_reference_missing(&mut self, r: usize, key: Value) -> Result<()> {
        let name = self.relation_name(r);
        self.reference_slot_mut(r)?.missing_key = Some(key);
        self.tracker.add_loaded_item(&name);
        Ok(())
    }

    /// The assigned or loaded target of a reference, without loading.
    pub fn reference<P: Entity>(&self, name: &str) -> Result<Option<ProxyRef<P>>> {
        let r = self.relation_of(name, RelationKind::ReferenceOne, P::NAME)?;
        self.reference_at(r)
    }

    pub(crate) fn reference_at<P: Entity>(&self, r: usize) -> Result<Option<ProxyRef<P>>> {
        match &self.reference_slot(r)?.target {
            None => Ok(None),
            Some(ReferenceTarget::Other { handle, .. }) => handle
                .downcast_ref::<ProxyRef<P>>()
                .cloned()
                .map(Some)
                .ok_or_else(|| OrmError::Relation(format!("reference #{} holds another entity", r))),
            Some(ReferenceTarget::SelfLoop) => {
                let me: Box<dyn Any> = Box::new(self.handle()?);
                me.downcast::<ProxyRef<P>>()
                    .map(|handle| Some(*handle))
                    .map_err(|_| OrmError::Relation(format!("reference #{} holds another entity", r)))
            }
        }
    }

    pub fn reference_state(&self, name: &str) -> Result<ReferenceState> {
        let r = self
            .proxy_type
            .relation_index_of(name)
            .ok_or_else(|| OrmError::UnknownField(name.to_string(), self.entity_name().to_string()))?;
        Ok(self.reference_slot(r)?.state)
    }

    pub fn is_reference_loaded(&self, name: &str) -> bool {
        self.proxy_type
            .relation_index_of(name)
            .is_some_and(|r| self.tracker.is_item_loaded(&self.relation_name(r)))
    }

    pub fn is_collection_loaded(&self, name: &str) -> bool {
        self.proxy_type
            .relation_index_of(name)
            .is_some_and(|r| self.tracker.is_collection_loaded(&self.relation_name(r)))
    }

    /// Marks a reference as populated so reading it never queries, until
    /// its foreign key changes.
    pub fn mark_reference_loaded(&mut self, name: &str) -> Result<()> {
        let r = self
            .proxy_type
            .relation_index_of(name)
            .ok_or_else(|| OrmError::UnknownField(name.to_string(), self.entity_name().to_string()))?;
        if self.reference_slot(r)?.target.is_none() {
            let key = self.value_at(self.key_field_of(r)?);
            return self.mark_reference_missing(r, key);
        }
        let name = self.relation_name(r);
        self.tracker.add_loaded_item(&name);
        Ok(())
    }

    /// Marks a collection as populated so reading it never queries.
    pub fn mark_collection_loaded(&mut self, name: &str) -> Result<()> {
        let r = self
            .proxy_type
            .relation_index_of(name)
            .ok_or_else(|| OrmError::UnknownField(name.to_string(), self.entity_name().to_string()))?;
        self.collection_slot_mut(r)?;
        let name = self.relation_name(r);
        self.tracker.add_loaded_collection(&name);
        Ok(())
    }

    /// The populated items of a collection, without loading.
    pub fn collection<C: Entity>(&self, name: &str) -> Result<Option<Vec<ProxyRef<C>>>> {
        let r = self.relation_of(name, RelationKind::ReferenceMany, C::NAME)?;
        self.collection_at(r)
    }

    pub(crate) fn collection_at<C: Entity>(&self, r: usize) -> Result<Option<Vec<ProxyRef<C>>>> {
        let items = match self.relations.get(r) {
            Some(RelationSlot::Many(slot)) => slot.items.as_ref(),
            _ => return Err(OrmError::Relation(format!("relation #{} is not a collection", r))),
        };
        match items {
            None => Ok(None),
            Some(items) => items
                .downcast_ref::<Vec<ProxyRef<C>>>()
                .cloned()
                .map(Some)
                .ok_or_else(|| OrmError::Relation(format!("collection #{} holds another entity", r))),
        }
    }

    /// Replaces a collection and marks it loaded. Nothing else changes.
    pub fn set_collection<C: Entity>(&mut self, name: &str, items: Vec<ProxyRef<C>>) -> Result<()> {
        let r = self.relation_of(name, RelationKind::ReferenceMany, C::NAME)?;
        self.store_collection(r, items)
    }

    pub(crate) fn store_collection<C: Entity>(&mut self, r: usize, items: Vec<ProxyRef<C>>) -> Result<()> {
        self.collection_slot_mut(r)?.items = Some(Box::new(items));
        let name = self.relation_name(r);
        self.tracker.add_loaded_collection(&name);
        Ok(())
    }
}
