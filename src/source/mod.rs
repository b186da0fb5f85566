//! The contract this crate needs from a query layer.
//!
//! Statement building, SQL dialects and drivers live behind [`DataSource`];
//! the core only asks for rows in a given column order and for single-row
//! writes keyed by the primary key.

pub mod memory;

pub use memory::MemorySource;

use async_trait::async_trait;

use crate::core::{Result, Row, Value};

/// A row query: the requested columns, in order, with an optional equality
/// filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub entity: String,
    pub columns: Vec<String>,
    pub filter: Option<(String, Value)>,
}

impl FetchRequest {
    pub fn new(entity: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            entity: entity.into(),
            columns,
            filter: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some((field.into(), value.into()));
        self
    }
}

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Rows matching the request, each holding one value per requested column.
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Row>>;

    /// Inserts one row and returns its identity. When `values` carries no
    /// `key_field`, the source generates the identity.
    async fn insert(&self, entity: &str, values: &[(String, Value)], key_field: &str) -> Result<Value>;

    /// Applies `changes` to the row with `key`; returns the number of rows hit.
    async fn update(
        &self,
        entity: &str,
        key_field: &str,
        key: &Value,
        changes: &[(String, Value)],
    ) -> Result<u64>;

    async fn delete(&self, entity: &str, key_field: &str, key: &Value) -> Result<u64>;
}
