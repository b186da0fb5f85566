// ============================================================================
// trackorm: runtime core of an object-relational mapper
// ============================================================================
//
// Plain entity structs are wrapped in tracked proxies that record original
// values, report dirty fields, keep foreign keys in step with the identity of
// referenced objects, and load relations lazily through a session backed by
// an identity cache.

// Lets `#[derive(Entity)]` output (which names `::trackorm`) work in this crate.
extern crate self as trackorm;

pub mod cache;
pub mod config;
pub mod core;
pub mod proxy;
pub mod relation;
pub mod schema;
pub mod session;
pub mod source;
pub mod tracker;

pub use cache::IdentityCache;
pub use config::{CacheLimits, OrmConfig};
pub use core::{DataType, OrmError, PersistValue, Result, Row, Value};
pub use proxy::{
    Entity, EntityRegistry, EntityRegistryBuilder, FieldAccessor, LoadFuture, Manifest, Proxy,
    ProxyRef, ProxyType, ValueBag,
};
pub use relation::{IdentityCell, ReferenceState, Subscription};
pub use schema::{
    Collection, Constraint, EntitySchema, PropertyDescriptor, Reference, RelationKind,
    SchemaCatalog,
};
pub use session::{SaveOutcome, Session, SessionBuilder};
pub use source::{DataSource, FetchRequest, MemorySource};
pub use tracker::{StateTracker, ValidationError, ValidationErrors};

// The derive lives in the macro namespace, next to the trait of the same name.
pub use trackorm_derive::Entity;
