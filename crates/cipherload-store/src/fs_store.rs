use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use cipherload_core::object_store::{ObjectLocation, ObjectStore, ObjectStoreError};
use tracing::instrument;

use crate::write_atomic;

/// Object store rooted at a local directory: `{root}/{bucket}/{path}`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, location: &ObjectLocation) -> Result<PathBuf, ObjectStoreError> {
        check_segment(&location.bucket, &location.bucket)?;
        let mut path = self.root.join(&location.bucket);
        for segment in location.path.split('/') {
            check_segment(&location.path, segment)?;
            path.push(segment);
        }
        Ok(path)
    }
}

/// Every segment must be a single plain path component, so joined paths stay under the root.
fn check_segment(full: &str, segment: &str) -> Result<(), ObjectStoreError> {
    let mut components = Path::new(segment).components();
    let reason = if segment.is_empty() {
        "empty segment"
    } else if segment == "." || segment == ".." {
        "relative segment"
    } else if segment.contains(['/', '\\', '\0']) {
        "illegal character"
    } else if !matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) {
        "not a plain name"
    } else {
        return Ok(());
    };
    Err(ObjectStoreError::InvalidPath {
        path: full.to_string(),
        reason: reason.to_string(),
    })
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip_all, fields(location = %location, content_type = %content_type, len = bytes.len()))]
    async fn put(
        &self,
        location: &ObjectLocation,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        let path = self.path_for(location)?;
        write_atomic(&path, bytes).map_err(|e| ObjectStoreError::Backend {
            reason: format!("writing {}: {e}", path.display()),
        })?;
        Ok(format!("file://{}", path.display()))
    }

    #[instrument(skip_all, fields(location = %location))]
    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.path_for(location)?;
        fs::read(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ObjectStoreError::NotFound {
                    location: location.to_string(),
                }
            } else {
                ObjectStoreError::Backend {
                    reason: format!("reading {}: {err}", path.display()),
                }
            }
        })
    }
}
