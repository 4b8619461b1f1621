//! Google Cloud backends: Cloud Storage for blobs, BigQuery for rows.
//! Both talk to the public REST APIs with a caller-supplied OAuth bearer token.

pub mod bigquery;
pub mod gcs;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

pub use bigquery::BigQueryWarehouse;
pub use gcs::GcsObjectStore;

pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
pub const DEFAULT_BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com";

/// GCP project settings as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GcpConfig {
    pub project_id: String,
    /// OAuth access token; falls back to the environment when absent.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub storage_endpoint: Option<String>,
    #[serde(default)]
    pub bigquery_endpoint: Option<String>,
}

impl GcpConfig {
    pub fn storage_base(&self) -> &str {
        self.storage_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_STORAGE_ENDPOINT)
            .trim_end_matches('/')
    }

    pub fn bigquery_base(&self) -> &str {
        self.bigquery_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_BIGQUERY_ENDPOINT)
            .trim_end_matches('/')
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static("cipherload"));
    headers
}

/// Best-effort body text for error messages.
async fn error_body(resp: reqwest::Response) -> String {
    resp.text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {e}>"))
}
