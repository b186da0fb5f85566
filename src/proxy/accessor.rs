use crate::core::{Result, Value};
use crate::schema::EntitySchema;

/// A plain struct that can be wrapped in a [`crate::Proxy`].
///
/// Normally implemented by `#[derive(Entity)]`. The accessor table must list
/// the declared scalar fields in the same order as `schema()` declares them;
/// the registry rejects a mismatch.
pub trait Entity: Default + Clone + Send + Sync + 'static {
    /// Entity name as used in schemas, relation targets and the data source.
    const NAME: &'static str;

    fn schema() -> EntitySchema;

    fn accessors() -> &'static [FieldAccessor<Self>];
}

/// Reads and writes one declared scalar field as a [`Value`].
pub struct FieldAccessor<T> {
    pub name: &'static str,
    pub get: fn(&T) -> Value,
    pub set: fn(&mut T, Value) -> Result<()>,
}

impl<T> FieldAccessor<T> {
    pub const fn new(
        name: &'static str,
        get: fn(&T) -> Value,
        set: fn(&mut T, Value) -> Result<()>,
    ) -> Self {
        Self { name, get, set }
    }
}

impl<T> Clone for FieldAccessor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FieldAccessor<T> {}

impl<T> std::fmt::Debug for FieldAccessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldAccessor").field("name", &self.name).finish()
    }
}
