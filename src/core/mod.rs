pub mod error;
pub mod types;
pub mod value;

pub use error::{OrmError, Result};
pub use types::{DataType, PersistValue};
pub use value::Value;

/// A row as returned by the query layer: one value per requested column.
pub type Row = Vec<Value>;
