use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};

use super::validation::ValidationErrors;
use crate::core::Value;

/// Per-proxy change tracking state.
///
/// The tracker never reads the entity itself; the proxy reports every write
/// through [`StateTracker::set_field_value`] and hands over the full current
/// state when a new snapshot is taken.
#[derive(Debug, Clone, Default)]
pub struct StateTracker {
    original_values: HashMap<String, Value>,
    /// Field names whose current value differs from the snapshot, in the order
    /// they first became dirty.
    changed: Vec<String>,
    is_new: bool,
    is_loading: bool,
    loaded_items: HashSet<String>,
    loaded_collections: HashSet<String>,
    validation_errors: ValidationErrors,
}

impl StateTracker {
    pub fn new(is_new: bool) -> Self {
        Self {
            is_new,
            ..Self::default()
        }
    }

    /// Records a write of `value` to `name`.
    ///
    /// While loading, the value becomes the snapshot. Otherwise the field
    /// joins the changed view when it differs from the snapshot and leaves it
    /// when it is equal again.
    pub fn set_field_value(&mut self, name: &str, value: &Value) {
        if self.is_loading {
            self.original_values.insert(name.to_string(), value.clone());
            self.changed.retain(|n| n != name);
            return;
        }

        let unchanged = match self.original_values.get(name) {
            Some(original) => original == value,
            None => value.is_null(),
        };

        let position = self.changed.iter().position(|n| n == name);
        match (unchanged, position) {
            (true, Some(pos)) => {
                self.changed.remove(pos);
            }
            (false, None) => self.changed.push(name.to_string()),
            _ => {}
        }
    }

    /// Replaces the snapshot with `values` and clears the changed view.
    pub fn set_original_values<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        self.original_values = values.into_iter().map(|(n, v)| (n.into(), v)).collect();
        self.changed.clear();
    }

    /// Moves a single field's snapshot to `written` after it reached storage,
    /// then re-evaluates it against `current`.
    pub fn accept_written(&mut self, name: &str, written: Value, current: &Value) {
        self.original_values.insert(name.to_string(), written);
        let was_loading = std::mem::replace(&mut self.is_loading, false);
        self.set_field_value(name, current);
        self.is_loading = was_loading;
    }

    pub fn original_value(&self, name: &str) -> Option<&Value> {
        self.original_values.get(name)
    }

    pub fn original_values(&self) -> &HashMap<String, Value> {
        &self.original_values
    }

    pub fn changed_fields(&self) -> &[String] {
        &self.changed
    }

    pub fn is_changed(&self, name: &str) -> bool {
        self.changed.iter().any(|n| n == name)
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn mark_saved(&mut self) {
        self.is_new = false;
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Enters the loading scope and returns the previous flag for
    /// [`StateTracker::end_loading`]. Prefer [`LoadingGuard`].
    pub fn begin_loading(&mut self) -> bool {
        std::mem::replace(&mut self.is_loading, true)
    }

    pub fn end_loading(&mut self, previous: bool) {
        self.is_loading = previous;
    }

    pub fn is_item_loaded(&self, name: &str) -> bool {
        self.loaded_items.contains(name)
    }

    pub fn is_collection_loaded(&self, name: &str) -> bool {
        self.loaded_collections.contains(name)
    }

    pub fn add_loaded_item(&mut self, name: &str) {
        if !self.loaded_items.contains(name) {
            self.loaded_items.insert(name.to_string());
        }
    }

    pub fn add_loaded_collection(&mut self, name: &str) {
        if !self.loaded_collections.contains(name) {
            self.loaded_collections.insert(name.to_string());
        }
    }

    /// Forgets a loaded reference so the next read fetches it again.
    pub fn forget_loaded_item(&mut self, name: &str) {
        self.loaded_items.remove(name);
    }

    pub fn validation_errors(&self) -> &ValidationErrors {
        &self.validation_errors
    }

    pub fn set_validation_errors(&mut self, errors: ValidationErrors) {
        self.validation_errors = errors;
    }
}

/// Anything that owns a [`StateTracker`].
pub trait Tracked {
    fn tracker(&self) -> &StateTracker;
    fn tracker_mut(&mut self) -> &mut StateTracker;
}

impl Tracked for StateTracker {
    fn tracker(&self) -> &StateTracker {
        self
    }

    fn tracker_mut(&mut self) -> &mut StateTracker {
        self
    }
}

/// Holds the loading scope open for as long as it lives.
///
/// Dereferences to the tracked value so writes can go through it; the
/// previous loading flag is restored on drop, including on early return.
pub struct LoadingGuard<'a, P: Tracked> {
    target: &'a mut P,
    previous: bool,
}

impl<'a, P: Tracked> LoadingGuard<'a, P> {
    pub fn enter(target: &'a mut P) -> Self {
        let previous = target.tracker_mut().begin_loading();
        Self { target, previous }
    }
}

impl<P: Tracked> Deref for LoadingGuard<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        self.target
    }
}

impl<P: Tracked> DerefMut for LoadingGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut P {
        self.target
    }
}

impl<P: Tracked> Drop for LoadingGuard<'_, P> {
    fn drop(&mut self) {
        let previous = self.previous;
        self.target.tracker_mut().end_loading(previous);
    }
}
