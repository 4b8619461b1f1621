use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::record::{Record, Row};

/// Errors produced by warehouse backends. Returned to the caller, never swallowed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WarehouseError {
    #[error("invalid identifier `{name}`")]
    InvalidIdentifier { name: String },
    #[error("table {table} does not exist")]
    TableNotFound { table: String },
    #[error("creating table {table} failed: {reason}")]
    CreateTable { table: String, reason: String },
    /// The warehouse accepted the request but rejected the row.
    #[error("insert into {table} failed: {}", errors.join("; "))]
    Insert { table: String, errors: Vec<String> },
    #[error("access denied: {reason}")]
    Unauthorized { reason: String },
    #[error("warehouse failure: {reason}")]
    Backend { reason: String },
}

/// Fully qualified `dataset.table` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Dataset and table ids must be letters, digits and underscores.
    pub fn validate(&self) -> Result<(), WarehouseError> {
        for name in [&self.dataset, &self.table] {
            let ok = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !ok {
                return Err(WarehouseError::InvalidIdentifier { name: name.clone() });
            }
        }
        Ok(())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Column set of a table. Every column is a nullable STRING.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<String>,
}

impl TableSchema {
    pub const COLUMN_TYPE: &'static str = "STRING";

    /// One column per top-level field, in field order.
    pub fn from_record(record: &Record) -> Self {
        Self {
            columns: record.fields().map(str::to_string).collect(),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Row columns this schema does not know about, formatted like warehouse errors.
    pub fn unknown_columns(&self, row: &Row) -> Vec<String> {
        row.keys()
            .filter(|column| !self.contains(column))
            .map(|column| format!("no such field: {column}"))
            .collect()
    }
}

/// Result of a successful insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    pub table: TableRef,
    pub rows: usize,
}

/// Tabular sink receiving one row per record.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Short backend name used for logging.
    fn name(&self) -> &'static str;

    /// Create `table` with `schema` unless it already exists. An existing
    /// table keeps its columns.
    async fn ensure_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
    ) -> Result<(), WarehouseError>;

    /// Insert a single row.
    async fn insert_row(&self, table: &TableRef, row: &Row)
        -> Result<InsertOutcome, WarehouseError>;

    /// Derive a STRING schema from the record, ensure the table exists and
    /// insert the record as one row.
    async fn write(&self, table: &TableRef, record: &Record) -> Result<InsertOutcome, WarehouseError> {
        let schema = TableSchema::from_record(record);
        self.ensure_table(table, &schema).await?;
        let outcome = self.insert_row(table, &record.to_row()).await?;
        debug!(backend = self.name(), %table, rows = outcome.rows, "row inserted");
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Row>,
}

/// In-memory warehouse for tests. Clones share the same tables.
#[derive(Debug, Default, Clone)]
pub struct InMemoryWarehouse {
    inner: Arc<Mutex<HashMap<TableRef, MemoryTable>>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self, table: &TableRef) -> Option<TableSchema> {
        let map = self.inner.lock().ok()?;
        map.get(table).map(|t| t.schema.clone())
    }

    pub fn rows(&self, table: &TableRef) -> Vec<Row> {
        self.inner
            .lock()
            .ok()
            .and_then(|map| map.get(table).map(|t| t.rows.clone()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
    ) -> Result<(), WarehouseError> {
        table.validate()?;
        let mut map = self.inner.lock().map_err(|err| WarehouseError::Backend {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.entry(table.clone()).or_insert_with(|| MemoryTable {
            schema: schema.clone(),
            rows: Vec::new(),
        });
        Ok(())
    }

    async fn insert_row(
        &self,
        table: &TableRef,
        row: &Row,
    ) -> Result<InsertOutcome, WarehouseError> {
        let mut map = self.inner.lock().map_err(|err| WarehouseError::Backend {
            reason: format!("lock poisoned: {err}"),
        })?;
        let target = map
            .get_mut(table)
            .ok_or_else(|| WarehouseError::TableNotFound {
                table: table.to_string(),
            })?;

        let errors = target.schema.unknown_columns(row);
        if !errors.is_empty() {
            return Err(WarehouseError::Insert {
                table: table.to_string(),
                errors,
            });
        }

        target.rows.push(row.clone());
        Ok(InsertOutcome {
            table: table.clone(),
            rows: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).expect("object")
    }

    #[tokio::test]
    async fn same_keys_keep_column_set_stable() {
        let warehouse = InMemoryWarehouse::new();
        let table = TableRef::new("user_data", "users");

        warehouse
            .write(&table, &record(json!({"name": "a", "age": 1})))
            .await
            .expect("first write");
        let before = warehouse.schema(&table).expect("table exists");

        let outcome = warehouse
            .write(&table, &record(json!({"age": 2, "name": "b"})))
            .await
            .expect("second write");

        assert_eq!(outcome.rows, 1);
        assert_eq!(warehouse.schema(&table), Some(before));
        assert_eq!(warehouse.rows(&table).len(), 2);
        assert_eq!(warehouse.rows(&table)[1]["age"].as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn unknown_columns_are_reported_not_swallowed() {
        let warehouse = InMemoryWarehouse::new();
        let table = TableRef::new("user_data", "users");
        warehouse
            .write(&table, &record(json!({"name": "a"})))
            .await
            .expect("first write");

        let err = warehouse
            .write(&table, &record(json!({"name": "b", "email": "b@example.com"})))
            .await
            .expect_err("extra column should be rejected");

        assert_eq!(
            err,
            WarehouseError::Insert {
                table: "user_data.users".into(),
                errors: vec!["no such field: email".into()],
            }
        );
        assert_eq!(warehouse.rows(&table).len(), 1);
    }

    #[tokio::test]
    async fn insert_into_missing_table_fails() {
        let warehouse = InMemoryWarehouse::new();
        let err = warehouse
            .insert_row(&TableRef::new("d", "t"), &Row::new())
            .await
            .expect_err("no table yet");
        assert!(matches!(err, WarehouseError::TableNotFound { .. }));
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        assert!(TableRef::new("user_data", "users").validate().is_ok());
        assert!(TableRef::new("../etc", "users").validate().is_err());
        assert!(TableRef::new("user_data", "").validate().is_err());
    }
}
