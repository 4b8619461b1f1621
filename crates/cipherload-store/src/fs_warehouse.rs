use std::{
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use cipherload_core::{
    record::Row,
    warehouse::{InsertOutcome, TableRef, TableSchema, Warehouse, WarehouseError},
};
use tracing::{debug, instrument};

use crate::write_atomic;

/// Warehouse stored as files: `{root}/{dataset}/{table}.schema.json` holds the
/// column set and `{root}/{dataset}/{table}.jsonl` one JSON row per line.
#[derive(Debug, Clone)]
pub struct LocalWarehouse {
    root: PathBuf,
}

impl LocalWarehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn schema_path(&self, table: &TableRef) -> PathBuf {
        self.root
            .join(&table.dataset)
            .join(format!("{}.schema.json", table.table))
    }

    fn rows_path(&self, table: &TableRef) -> PathBuf {
        self.root
            .join(&table.dataset)
            .join(format!("{}.jsonl", table.table))
    }

    pub fn schema(&self, table: &TableRef) -> Result<TableSchema, WarehouseError> {
        table.validate()?;
        let path = self.schema_path(table);
        let bytes = fs::read(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                WarehouseError::TableNotFound {
                    table: table.to_string(),
                }
            } else {
                backend_err(&path, err)
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|e| backend_err(&path, e))
    }

    /// All rows inserted so far, oldest first.
    pub fn rows(&self, table: &TableRef) -> Result<Vec<Row>, WarehouseError> {
        self.schema(table)?;
        let path = self.rows_path(table);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(backend_err(&path, err)),
        };

        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| backend_err(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str(&line).map_err(|e| backend_err(&path, e))?);
        }
        Ok(rows)
    }
}

#[async_trait]
impl Warehouse for LocalWarehouse {
    fn name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip_all, fields(table = %table, columns = schema.columns.len()))]
    async fn ensure_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
    ) -> Result<(), WarehouseError> {
        table.validate()?;
        let path = self.schema_path(table);
        if path.exists() {
            debug!("table already exists");
            return Ok(());
        }

        let body = serde_json::to_vec_pretty(schema).map_err(|e| WarehouseError::CreateTable {
            table: table.to_string(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, &body).map_err(|e| WarehouseError::CreateTable {
            table: table.to_string(),
            reason: e.to_string(),
        })
    }

    #[instrument(skip_all, fields(table = %table))]
    async fn insert_row(
        &self,
        table: &TableRef,
        row: &Row,
    ) -> Result<InsertOutcome, WarehouseError> {
        let schema = self.schema(table)?;
        let errors = schema.unknown_columns(row);
        if !errors.is_empty() {
            return Err(WarehouseError::Insert {
                table: table.to_string(),
                errors,
            });
        }

        let path = self.rows_path(table);
        let mut line = serde_json::to_vec(row).map_err(|e| backend_err(&path, e))?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| backend_err(&path, e))?;
        file.write_all(&line).map_err(|e| backend_err(&path, e))?;

        Ok(InsertOutcome {
            table: table.clone(),
            rows: 1,
        })
    }
}

fn backend_err<E: ToString>(path: &Path, err: E) -> WarehouseError {
    WarehouseError::Backend {
        reason: format!("{}: {}", path.display(), err.to_string()),
    }
}
