use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{DataSource, FetchRequest};
use crate::core::{OrmError, Result, Row, Value};

type StoredRow = HashMap<String, Value>;

#[derive(Default)]
struct MemoryTable {
    rows: Vec<StoredRow>,
    next_id: i64,
}

impl MemoryTable {
    fn position(&self, key_field: &str, key: &Value) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.get(key_field).is_some_and(|v| v == key))
    }
}

/// In-memory [`DataSource`]: one table per entity, column names compared
/// case-insensitively, integral identities generated from 1.
///
/// Counts every call and can fail the next one on request.
#[derive(Default)]
pub struct MemorySource {
    tables: RwLock<HashMap<String, MemoryTable>>,
    fetches: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    fail_next: Mutex<Option<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    fn take_failure(&self) -> Result<()> {
        match self.fail_next.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some(message) => Err(OrmError::Source(message)),
            None => Ok(()),
        }
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn insert_count(&self) -> u64 {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Stored rows of `entity`, columns lowercased.
    pub async fn rows(&self, entity: &str) -> Vec<HashMap<String, Value>> {
        self.tables
            .read()
            .await
            .get(&entity.to_ascii_lowercase())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Stores a row directly, bypassing the counters. Later generated
    /// identities continue after an integral `key_field`.
    pub async fn seed(&self, entity: &str, key_field: &str, values: &[(&str, Value)]) {
        let row: StoredRow = values
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect();
        let mut tables = self.tables.write().await;
        let table = tables.entry(entity.to_ascii_lowercase()).or_default();
        if let Some(Value::Integer(id)) = row.get(&key_field.to_ascii_lowercase()) {
            table.next_id = table.next_id.max(*id);
        }
        table.rows.push(row);
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Row>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;

        let tables = self.tables.read().await;
        let Some(table) = tables.get(&request.entity.to_ascii_lowercase()) else {
            return Ok(Vec::new());
        };

        let filter = request
            .filter
            .as_ref()
            .map(|(field, value)| (field.to_ascii_lowercase(), value));
        let columns: Vec<String> = request.columns.iter().map(|c| c.to_ascii_lowercase()).collect();

        let rows: Vec<Row> = table
            .rows
            .iter()
            .filter(|row| match &filter {
                Some((field, value)) => row.get(field).is_some_and(|v| v == *value),
                None => true,
            })
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();

        debug!(entity = %request.entity, rows = rows.len(), "memory fetch");
        Ok(rows)
    }

    async fn insert(&self, entity: &str, values: &[(String, Value)], key_field: &str) -> Result<Value> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;

        let key_field = key_field.to_ascii_lowercase();
        let mut row: StoredRow = values
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect();

        let mut tables = self.tables.write().await;
        let table = tables.entry(entity.to_ascii_lowercase()).or_default();

        let key = match row.get(&key_field) {
            Some(key) if !key.is_unassigned_identity() => {
                if table.position(&key_field, key).is_some() {
                    return Err(OrmError::Source(format!(
                        "duplicate key {} for '{}'",
                        key, entity
                    )));
                }
                if let Value::Integer(id) = key {
                    table.next_id = table.next_id.max(*id);
                }
                key.clone()
            }
            _ => {
                table.next_id += 1;
                Value::Integer(table.next_id)
            }
        };

        row.insert(key_field, key.clone());
        table.rows.push(row);
        debug!(entity, key = %key, "memory insert");
        Ok(key)
    }

    async fn update(
        &self,
        entity: &str,
        key_field: &str,
        key: &Value,
        changes: &[(String, Value)],
    ) -> Result<u64> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;

        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(&entity.to_ascii_lowercase()) else {
            return Ok(0);
        };
        let Some(pos) = table.position(&key_field.to_ascii_lowercase(), key) else {
            return Ok(0);
        };

        let row = &mut table.rows[pos];
        for (name, value) in changes {
            row.insert(name.to_ascii_lowercase(), value.clone());
        }
        debug!(entity, key = %key, fields = changes.len(), "memory update");
        Ok(1)
    }

    async fn delete(&self, entity: &str, key_field: &str, key: &Value) -> Result<u64> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;

        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(&entity.to_ascii_lowercase()) else {
            return Ok(0);
        };
        let key_field = key_field.to_ascii_lowercase();
        let before = table.rows.len();
        table
            .rows
            .retain(|row| !row.get(&key_field).is_some_and(|v| v == key));
        Ok((before - table.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
        pairs.iter().map(|(n, v)| (n.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_insert_generates_identities() {
        let source = MemorySource::new();
        let first = source
            .insert("Order", &values(&[("title", "a".into())]), "id")
            .await
            .unwrap();
        let second = source
            .insert("order", &values(&[("id", Value::Integer(0)), ("title", "b".into())]), "id")
            .await
            .unwrap();
        assert_eq!(first, Value::Integer(1));
        assert_eq!(second, Value::Integer(2));
        assert_eq!(source.insert_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_projects_and_filters() {
        let source = MemorySource::new();
        source.seed("Order", "id", &[("id", 7.into()), ("Title", "x".into())]).await;
        source.seed("Order", "id", &[("id", 8.into()), ("Title", "y".into())]).await;

        let request = FetchRequest::new("Order", vec!["title".into(), "missing".into()]).filter("ID", 8);
        let rows = source.fetch(&request).await.unwrap();
        assert_eq!(rows, vec![vec![Value::Text("y".into()), Value::Null]]);

        let next = source.insert("Order", &[], "id").await.unwrap();
        assert_eq!(next, Value::Integer(9));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let source = MemorySource::new();
        let key = source
            .insert("Order", &values(&[("title", "a".into())]), "id")
            .await
            .unwrap();
        let hit = source
            .update("Order", "id", &key, &values(&[("title", "b".into())]))
            .await
            .unwrap();
        assert_eq!(hit, 1);
        assert_eq!(source.rows("Order").await[0]["title"], Value::Text("b".into()));

        assert_eq!(source.delete("Order", "id", &key).await.unwrap(), 1);
        assert_eq!(source.delete("Order", "id", &key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let source = MemorySource::new();
        source.fail_next("boom");
        let request = FetchRequest::new("Order", vec![]);
        assert!(matches!(source.fetch(&request).await, Err(OrmError::Source(m)) if m == "boom"));
        assert!(source.fetch(&request).await.is_ok());
        assert_eq!(source.fetch_count(), 2);
    }
}
