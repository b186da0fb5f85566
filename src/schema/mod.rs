pub mod catalog;
pub mod descriptor;
pub mod markers;
pub mod naming;

pub use catalog::{SchemaCatalog, validate_schema};
pub use descriptor::{Constraint, EntitySchema, PropertyDescriptor, RelationKind};
pub use markers::{Collection, Reference};
pub use naming::{back_reference_key_name, reference_key_name, snake_case};
