use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock, Weak};

use super::accessor::{Entity, FieldAccessor};
use super::bag::ValueBag;
use super::handle::ProxyRef;
use super::synthesis::{FieldSlot, FieldSpec, ProxyType};
use crate::core::{OrmError, Result, Value};
use crate::relation::identity::IdentityCell;
use crate::relation::reference::RelationSlot;
use crate::session::Session;
use crate::tracker::{LoadingGuard, StateTracker, Tracked, ValidationErrors, check_constraints};

/// A tracked entity: the plain struct, the keys the schema pass added, and
/// the state that makes writes observable.
///
/// All writes go through [`Proxy::set_value`], [`Proxy::set_by_index`] or
/// [`Proxy::write_field`], which report to the tracker. The plain struct is
/// only handed out by shared reference.
pub struct Proxy<T: Entity> {
    pub(crate) entity: T,
    pub(crate) shadow: Vec<Value>,
    pub(crate) proxy_type: Arc<ProxyType>,
    pub(crate) tracker: StateTracker,
    pub(crate) identity: Arc<IdentityCell>,
    pub(crate) relations: Vec<RelationSlot>,
    /// Back-reference to the shared handle that owns this proxy.
    pub(crate) this: Weak<RwLock<Proxy<T>>>,
    pub(crate) session: Option<Session>,
    /// Set while a generated key is stored; the caller publishes it once the
    /// lock is released.
    pub(crate) defer_publish: bool,
}

impl<T: Entity> Proxy<T> {
    pub(crate) fn new(
        proxy_type: Arc<ProxyType>,
        entity: T,
        this: Weak<RwLock<Proxy<T>>>,
        identity: Arc<IdentityCell>,
        session: Option<Session>,
        is_new: bool,
    ) -> Self {
        let relations = proxy_type
            .relations()
            .iter()
            .map(|binding| RelationSlot::for_kind(binding.kind))
            .collect();
        Self {
            entity,
            shadow: vec![Value::Null; proxy_type.shadow_count()],
            proxy_type,
            tracker: StateTracker::new(is_new),
            identity,
            relations,
            this,
            session,
            defer_publish: false,
        }
    }

    /// Applies defaults and takes the first snapshot, all inside the loading
    /// scope.
    ///
    /// A default only applies to a field still holding the value it has in
    /// `T::default()`, so values set before wrapping survive.
    pub(crate) fn initialize(&mut self) -> Result<()> {
        let proxy_type = Arc::clone(&self.proxy_type);
        let pristine = T::default();
        {
            let mut scope = LoadingGuard::enter(self);
            for (i, spec) in proxy_type.fields().iter().enumerate() {
                let current = scope.value_at(i);
                if let Some(default) = &spec.default_value {
                    let untouched = match spec.slot {
                        FieldSlot::Declared(k) => T::accessors()
                            .get(k)
                            .is_some_and(|a| (a.get)(&pristine) == current),
                        FieldSlot::Shadow(_) => current.is_null(),
                    };
                    if untouched && current != *default {
                        scope.write_slot(i, default.clone())?;
                    }
                } else if spec.backfill_text && current.is_null() {
                    scope.write_slot(i, Value::Text(String::new()))?;
                }
            }
        }
        self.identity.publish(self.primary_key());
        self.set_original_values();
        Ok(())
    }

    pub fn entity(&self) -> &T {
        &self.entity
    }

    pub fn entity_name(&self) -> &str {
        self.proxy_type.entity()
    }

    pub fn proxy_type(&self) -> &Arc<ProxyType> {
        &self.proxy_type
    }

    pub fn identity(&self) -> &Arc<IdentityCell> {
        &self.identity
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The shared handle this proxy lives in.
    pub fn handle(&self) -> Result<ProxyRef<T>> {
        let inner = self.this.upgrade().ok_or_else(|| {
            OrmError::Relation(format!("proxy of '{}' is no longer shared", self.entity_name()))
        })?;
        Ok(ProxyRef::from_parts(inner, Arc::clone(&self.identity)))
    }

    fn accessor(&self, k: usize) -> Result<&'static FieldAccessor<T>> {
        T::accessors().get(k).ok_or_else(|| {
            OrmError::Schema(format!(
                "'{}' has no accessor #{}",
                self.entity_name(),
                k
            ))
        })
    }

    fn spec(&self, index: usize) -> Result<&FieldSpec> {
        self.proxy_type
            .field(index)
            .ok_or_else(|| OrmError::UnknownField(format!("#{}", index), self.entity_name().to_string()))
    }

    /// Current value of field `index`, `Null` when out of range.
    pub(crate) fn value_at(&self, index: usize) -> Value {
        match self.proxy_type.field(index).map(|f| f.slot) {
            Some(FieldSlot::Declared(k)) => T::accessors()
                .get(k)
                .map(|a| (a.get)(&self.entity))
                .unwrap_or_default(),
            Some(FieldSlot::Shadow(j)) => self.shadow.get(j).cloned().unwrap_or_default(),
            None => Value::Null,
        }
    }

    pub fn get_value(&self, name: &str) -> Result<Value> {
        let index = self.proxy_type.require_index(name)?;
        Ok(self.value_at(index))
    }

    pub fn get_by_index(&self, index: usize) -> Result<Value> {
        self.spec(index)?;
        Ok(self.value_at(index))
    }

    /// Sets a field by name (case-insensitive).
    pub fn set_value(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.proxy_type.require_index(name)?;
        self.write_slot(index, value.into())
    }

    pub fn set_by_index(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.write_slot(index, value.into())
    }

    /// Mutates the `k`-th declared field in place, then reports the write.
    ///
    /// Generated typed setters go through here.
    pub fn write_field<F>(&mut self, k: usize, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut T),
    {
        let index = self.proxy_type.declared_field(k).ok_or_else(|| {
            OrmError::Schema(format!("'{}' has no declared field #{}", self.entity_name(), k))
        })?;
        mutate(&mut self.entity);
        self.after_write(index)
    }

    pub(crate) fn check_assignable(&self, index: usize, value: &Value) -> Result<()> {
        let spec = self.spec(index)?;
        if !spec.data_type.is_compatible(value) {
            return Err(OrmError::TypeMismatch(format!(
                "{}.{} expects {}, got {}",
                self.entity_name(),
                spec.name,
                spec.data_type,
                value.type_name()
            )));
        }
        if value.is_null() && !spec.nullable {
            return Err(OrmError::TypeMismatch(format!(
                "{}.{} is not nullable",
                self.entity_name(),
                spec.name
            )));
        }
        Ok(())
    }

    /// The one write path: store, report to the tracker, then run the key and
    /// foreign-key hooks.
    pub(crate) fn write_slot(&mut self, index: usize, value: Value) -> Result<()> {
        self.check_assignable(index, &value)?;
        let slot = self.spec(index)?.slot;
        match slot {
            FieldSlot::Declared(k) => {
                let accessor = self.accessor(k)?;
                (accessor.set)(&mut self.entity, value)?;
            }
            FieldSlot::Shadow(j) => self.store_shadow(index, j, value),
        }
        self.after_write(index)
    }

    fn store_shadow(&mut self, index: usize, j: usize, value: Value) {
        let widen = self
            .proxy_type
            .field(index)
            .is_some_and(|f| f.data_type == crate::core::DataType::Float);
        let value = match value {
            Value::Integer(i) if widen => Value::Float(i as f64),
            other => other,
        };
        if let Some(slot) = self.shadow.get_mut(j) {
            *slot = value;
        }
    }

    pub(crate) fn after_write(&mut self, index: usize) -> Result<()> {
        let proxy_type = Arc::clone(&self.proxy_type);
        let spec = proxy_type
            .field(index)
            .ok_or_else(|| OrmError::UnknownField(format!("#{}", index), self.entity_name().to_string()))?;
        let current = self.value_at(index);
        self.tracker.set_field_value(&spec.name, &current);

        if index == proxy_type.key_index() {
            self.on_key_written(current)?;
        } else if let Some(r) = spec.reference {
            self.on_foreign_key_written(r, &current);
        }
        Ok(())
    }

    pub fn primary_key(&self) -> Value {
        self.value_at(self.proxy_type.key_index())
    }

    /// Writes the primary key. Dependents wired to this proxy receive the new
    /// key before this returns.
    pub fn set_primary_key(&mut self, key: impl Into<Value>) -> Result<()> {
        let index = self.proxy_type.key_index();
        self.write_slot(index, key.into())
    }

    /// Writes a key without notifying dependents. The caller must publish it
    /// through the identity cell after dropping this proxy's guard.
    pub(crate) fn store_key_unpublished(&mut self, key: Value) -> Result<()> {
        self.defer_publish = true;
        let written = self.set_primary_key(key);
        self.defer_publish = false;
        written
    }

    pub fn changed_fields(&self) -> &[String] {
        self.tracker.changed_fields()
    }

    pub fn has_changes(&self) -> bool {
        self.tracker.has_changes()
    }

    pub fn is_new(&self) -> bool {
        self.tracker.is_new()
    }

    /// Snapshot value of `name` as of the last load or save.
    pub fn original_value(&self, name: &str) -> Result<Option<&Value>> {
        let index = self.proxy_type.require_index(name)?;
        Ok(self.tracker.original_value(&self.proxy_type.fields()[index].name))
    }

    /// Resnapshots every field from its current value.
    pub fn set_original_values(&mut self) {
        let values: Vec<(String, Value)> = self
            .proxy_type
            .fields()
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), self.value_at(i)))
            .collect();
        self.tracker.set_original_values(values);
    }

    /// Records that `written` reached storage, keeping later edits dirty.
    pub(crate) fn accept_written(&mut self, written: Vec<(usize, Value)>) {
        for (index, value) in written {
            let current = self.value_at(index);
            if let Some(spec) = self.proxy_type.field(index) {
                self.tracker.accept_written(&spec.name, value, &current);
            }
        }
    }

    pub(crate) fn mark_saved(&mut self) {
        self.tracker.mark_saved();
    }

    /// Recomputes the constraint failures of every field, in field order.
    pub fn validation_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        for (i, spec) in self.proxy_type.fields().iter().enumerate() {
            if !spec.constraints.is_empty() {
                check_constraints(&spec.name, &spec.constraints, &self.value_at(i), &mut errors);
            }
        }
        errors
    }

    pub fn is_valid(&self) -> bool {
        self.validation_errors().is_empty()
    }

    /// Validates and records the result on the tracker.
    pub fn validate(&mut self) -> Result<()> {
        let errors = self.validation_errors();
        self.tracker.set_validation_errors(errors.clone());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(OrmError::Validation(errors))
        }
    }

    pub fn to_bag(&self) -> ValueBag {
        let values = (0..self.proxy_type.fields().len())
            .map(|i| self.value_at(i))
            .collect();
        ValueBag::from_parts(self.proxy_type.entity(), self.proxy_type.columns().to_vec(), values)
    }

    /// Bulk-assigns every column of `bag`, then resnapshots. Does not change
    /// `is_new`.
    ///
    /// Every value is checked before anything is written, so a failing bag
    /// leaves the proxy as it was.
    pub fn from_bag(&mut self, bag: &ValueBag) -> Result<()> {
        if !bag.entity().eq_ignore_ascii_case(self.proxy_type.entity()) {
            return Err(OrmError::TypeMismatch(format!(
                "bag of '{}' cannot populate '{}'",
                bag.entity(),
                self.entity_name()
            )));
        }

        let mut resolved = Vec::with_capacity(bag.len());
        for (name, value) in bag.iter() {
            let index = self.proxy_type.require_index(name)?;
            self.check_assignable(index, value)?;
            resolved.push((index, value.clone()));
        }

        let mut staged = self.entity.clone();
        let mut shadow_writes = Vec::new();
        for (index, value) in &resolved {
            let slot = self.spec(*index)?.slot;
            match slot {
                FieldSlot::Declared(k) => (self.accessor(k)?.set)(&mut staged, value.clone())?,
                FieldSlot::Shadow(j) => shadow_writes.push((*index, j, value.clone())),
            }
        }

        {
            let mut scope = LoadingGuard::enter(self);
            scope.entity = staged;
            for (index, j, value) in shadow_writes {
                scope.store_shadow(index, j, value);
            }
            for (index, _) in &resolved {
                scope.after_write(*index)?;
            }
        }
        self.set_original_values();
        Ok(())
    }
}

impl<T: Entity> Tracked for Proxy<T> {
    fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    fn tracker_mut(&mut self) -> &mut StateTracker {
        &mut self.tracker
    }
}

/// Same object, or both keys assigned and equal.
impl<T: Entity> PartialEq for Proxy<T> {
    fn eq(&self, other: &Self) -> bool {
        if Weak::ptr_eq(&self.this, &other.this) {
            return true;
        }
        let (a, b) = (self.primary_key(), other.primary_key());
        !a.is_unassigned_identity() && !b.is_unassigned_identity() && a == b
    }
}

impl<T: Entity> Hash for Proxy<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.proxy_type.entity().hash(state);
        self.primary_key().hash(state);
    }
}

impl<T: Entity + fmt::Debug> fmt::Debug for Proxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("entity", &self.entity)
            .field("shadow", &self.shadow)
            .field("is_new", &self.is_new())
            .field("changed", &self.changed_fields())
            .finish_non_exhaustive()
    }
}
