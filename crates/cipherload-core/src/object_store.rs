use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;

/// Content type used for RSA ciphertext uploads.
pub const TEXT_PLAIN: &str = "text/plain";
/// Content type used for decrypted record uploads.
pub const APPLICATION_JSON: &str = "application/json";

/// Errors produced by object store backends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectStoreError {
    /// Requested object does not exist.
    #[error("object not found: {location}")]
    NotFound { location: String },
    /// Credentials missing, expired or lacking permission.
    #[error("access denied for {location}: {reason}")]
    Unauthorized { location: String, reason: String },
    /// Bucket or path cannot be mapped onto the backend.
    #[error("invalid object path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
    /// Underlying transport or storage failure.
    #[error("object store failure: {reason}")]
    Backend { reason: String },
}

/// Bucket/path pair addressing one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub path: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.path)
    }
}

/// Whole-object blob storage. No streaming, versioning or locking.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name used for logging.
    fn name(&self) -> &'static str;

    /// Store `bytes` at `location`, overwriting any existing object.
    /// Returns a URI identifying where the object landed.
    async fn put(
        &self,
        location: &ObjectLocation,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, ObjectStoreError>;

    /// Fetch the full object at `location`.
    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>, ObjectStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-memory object store for tests and dry runs. Clones share the same objects.
#[derive(Debug, Default, Clone)]
pub struct InMemoryObjectStore {
    inner: Arc<Mutex<HashMap<ObjectLocation, StoredObject>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type recorded by the last `put` at `location`.
    pub fn content_type(&self, location: &ObjectLocation) -> Option<String> {
        let map = self.inner.lock().ok()?;
        map.get(location).map(|obj| obj.content_type.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        location: &ObjectLocation,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        let mut map = self.inner.lock().map_err(|err| ObjectStoreError::Backend {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.insert(
            location.clone(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("memory://{location}"))
    }

    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>, ObjectStoreError> {
        let map = self.inner.lock().map_err(|err| ObjectStoreError::Backend {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.get(location)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| ObjectStoreError::NotFound {
                location: location.to_string(),
            })
    }
}
