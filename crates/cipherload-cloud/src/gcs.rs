use async_trait::async_trait;
use cipherload_core::object_store::{ObjectLocation, ObjectStore, ObjectStoreError};
use reqwest::{header::CONTENT_TYPE, StatusCode, Url};
use tracing::instrument;

use crate::{default_headers, error_body, GcpConfig};

/// Cloud Storage via the JSON API (simple media upload, `alt=media` download).
pub struct GcsObjectStore {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl GcsObjectStore {
    pub fn new(cfg: &GcpConfig, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: cfg.storage_base().to_string(),
            token: token.into(),
        }
    }

    /// `POST {base}/upload/storage/v1/b/{bucket}/o?uploadType=media&name={path}`
    fn upload_url(&self, location: &ObjectLocation) -> Result<Url, ObjectStoreError> {
        let mut url = endpoint(
            &self.base,
            &["upload", "storage", "v1", "b", location.bucket.as_str(), "o"],
        )?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", &location.path);
        Ok(url)
    }

    /// `GET {base}/storage/v1/b/{bucket}/o/{path}?alt=media`, with `/` in the path escaped.
    fn download_url(&self, location: &ObjectLocation) -> Result<Url, ObjectStoreError> {
        let mut url = endpoint(
            &self.base,
            &["storage", "v1", "b", location.bucket.as_str(), "o", location.path.as_str()],
        )?;
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    fn name(&self) -> &'static str {
        "gcs"
    }

    #[instrument(skip_all, fields(location = %location, content_type = %content_type, len = bytes.len()))]
    async fn put(
        &self,
        location: &ObjectLocation,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        let url = self.upload_url(location)?;
        let resp = self
            .client
            .post(url)
            .headers(default_headers())
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(transport_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, location, error_body(resp).await));
        }
        Ok(format!("gs://{}/{}", location.bucket, location.path))
    }

    #[instrument(skip_all, fields(location = %location))]
    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>, ObjectStoreError> {
        let url = self.download_url(location)?;
        let resp = self
            .client
            .get(url)
            .headers(default_headers())
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, location, error_body(resp).await));
        }
        let body = resp.bytes().await.map_err(transport_err)?;
        Ok(body.to_vec())
    }
}

fn endpoint(base: &str, segments: &[&str]) -> Result<Url, ObjectStoreError> {
    let mut url = Url::parse(base).map_err(|e| ObjectStoreError::Backend {
        reason: format!("invalid storage endpoint {base}: {e}"),
    })?;
    url.path_segments_mut()
        .map_err(|()| ObjectStoreError::Backend {
            reason: format!("storage endpoint {base} cannot take a path"),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn status_error(status: StatusCode, location: &ObjectLocation, body: String) -> ObjectStoreError {
    match status {
        StatusCode::NOT_FOUND => ObjectStoreError::NotFound {
            location: location.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ObjectStoreError::Unauthorized {
            location: location.to_string(),
            reason: format!("{status}: {body}"),
        },
        _ => ObjectStoreError::Backend {
            reason: format!("{location}: {status}: {body}"),
        },
    }
}

fn transport_err(err: reqwest::Error) -> ObjectStoreError {
    ObjectStoreError::Backend {
        reason: err.to_string(),
    }
}
