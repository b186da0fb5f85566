use serde::{Deserialize, Serialize};

use super::synthesis::ProxyType;
use crate::core::{OrmError, Result, Row, Value};

/// Untracked scalar twin of an entity: one value per proxy column.
///
/// Rows from the data source become bags, bags become proxies in one bulk
/// pass. Bags are also what the identity cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueBag {
    entity: String,
    columns: Vec<String>,
    values: Vec<Value>,
}

impl ValueBag {
    pub fn new(entity: impl Into<String>, columns: Vec<String>, values: Vec<Value>) -> Result<Self> {
        let entity = entity.into();
        if columns.len() != values.len() {
            return Err(OrmError::TypeMismatch(format!(
                "bag for '{}' has {} columns but {} values",
                entity,
                columns.len(),
                values.len()
            )));
        }
        Ok(Self {
            entity,
            columns,
            values,
        })
    }

    /// Columns and values are known to line up.
    pub(crate) fn from_parts(entity: &str, columns: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            entity: entity.to_string(),
            columns,
            values,
        }
    }

    /// Pairs a fetched row with the column order of `proxy_type`.
    pub fn from_row(proxy_type: &ProxyType, row: Row) -> Result<Self> {
        Self::new(proxy_type.entity(), proxy_type.columns().to_vec(), row)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|i| &self.values[i])
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> Result<()> {
        let i = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .ok_or_else(|| OrmError::UnknownField(column.to_string(), self.entity.clone()))?;
        self.values[i] = value.into();
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn into_row(self) -> Row {
        self.values
    }
}
