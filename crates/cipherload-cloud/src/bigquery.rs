use async_trait::async_trait;
use cipherload_core::{
    record::Row,
    warehouse::{InsertOutcome, TableRef, TableSchema, Warehouse, WarehouseError},
};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{default_headers, error_body, GcpConfig};

/// BigQuery via the v2 REST API (`tables.insert` + `tabledata.insertAll`).
pub struct BigQueryWarehouse {
    client: reqwest::Client,
    base: String,
    project_id: String,
    token: String,
}

impl BigQueryWarehouse {
    pub fn new(cfg: &GcpConfig, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: cfg.bigquery_base().to_string(),
            project_id: cfg.project_id.clone(),
            token: token.into(),
        }
    }

    fn tables_url(&self, dataset: &str) -> Result<Url, WarehouseError> {
        endpoint(
            &self.base,
            &["bigquery", "v2", "projects", self.project_id.as_str(), "datasets", dataset, "tables"],
        )
    }

    fn insert_all_url(&self, table: &TableRef) -> Result<Url, WarehouseError> {
        endpoint(
            &self.base,
            &[
                "bigquery",
                "v2",
                "projects",
                self.project_id.as_str(),
                "datasets",
                table.dataset.as_str(),
                "tables",
                table.table.as_str(),
                "insertAll",
            ],
        )
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    #[instrument(skip_all, fields(project = %self.project_id, table = %table))]
    async fn ensure_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
    ) -> Result<(), WarehouseError> {
        table.validate()?;
        let url = self.tables_url(&table.dataset)?;
        let resp = self
            .client
            .post(url)
            .headers(default_headers())
            .bearer_auth(&self.token)
            .json(&table_resource(&self.project_id, table, schema))
            .send()
            .await
            .map_err(transport_err)?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => {
                debug!("table already exists");
                Ok(())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(WarehouseError::Unauthorized {
                reason: error_body(resp).await,
            }),
            status => Err(WarehouseError::CreateTable {
                table: table.to_string(),
                reason: format!("{status}: {}", error_body(resp).await),
            }),
        }
    }

    #[instrument(skip_all, fields(project = %self.project_id, table = %table))]
    async fn insert_row(
        &self,
        table: &TableRef,
        row: &Row,
    ) -> Result<InsertOutcome, WarehouseError> {
        table.validate()?;
        let url = self.insert_all_url(table)?;
        let body = json!({
            "kind": "bigquery#tableDataInsertAllRequest",
            "rows": [{ "insertId": Uuid::new_v4().to_string(), "json": row }],
        });
        let resp = self
            .client
            .post(url)
            .headers(default_headers())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(transport_err)?;

        match resp.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(WarehouseError::TableNotFound {
                    table: table.to_string(),
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(WarehouseError::Unauthorized {
                    reason: error_body(resp).await,
                })
            }
            status => {
                return Err(WarehouseError::Backend {
                    reason: format!("{status}: {}", error_body(resp).await),
                })
            }
        }

        let parsed: InsertAllResponse = resp.json().await.map_err(transport_err)?;
        let errors = parsed.error_messages();
        if !errors.is_empty() {
            return Err(WarehouseError::Insert {
                table: table.to_string(),
                errors,
            });
        }
        Ok(InsertOutcome {
            table: table.clone(),
            rows: 1,
        })
    }
}

/// `tables.insert` request body: every column a NULLABLE STRING.
fn table_resource(project_id: &str, table: &TableRef, schema: &TableSchema) -> Value {
    let fields: Vec<Value> = schema
        .columns
        .iter()
        .map(|name| json!({ "name": name, "type": TableSchema::COLUMN_TYPE, "mode": "NULLABLE" }))
        .collect();
    json!({
        "tableReference": {
            "projectId": project_id,
            "datasetId": table.dataset,
            "tableId": table.table,
        },
        "schema": { "fields": fields },
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<RowErrors>,
}

#[derive(Debug, Deserialize)]
struct RowErrors {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl InsertAllResponse {
    fn error_messages(&self) -> Vec<String> {
        self.insert_errors
            .iter()
            .flat_map(|row| {
                row.errors.iter().map(move |e| {
                    format!(
                        "row {}: {} ({}{})",
                        row.index,
                        e.message.as_deref().unwrap_or("unknown error"),
                        e.reason.as_deref().unwrap_or("unknown"),
                        e.location
                            .as_deref()
                            .map(|l| format!(" at {l}"))
                            .unwrap_or_default(),
                    )
                })
            })
            .collect()
    }
}

fn endpoint(base: &str, segments: &[&str]) -> Result<Url, WarehouseError> {
    let mut url = Url::parse(base).map_err(|e| WarehouseError::Backend {
        reason: format!("invalid bigquery endpoint {base}: {e}"),
    })?;
    url.path_segments_mut()
        .map_err(|()| WarehouseError::Backend {
            reason: format!("bigquery endpoint {base} cannot take a path"),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn transport_err(err: reqwest::Error) -> WarehouseError {
    WarehouseError::Backend {
        reason: err.to_string(),
    }
}
