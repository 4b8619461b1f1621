//! Filesystem-backed object store and warehouse for offline runs.
//! Layouts mirror the cloud backends so the pipeline behaves the same locally.

pub mod fs_store;
pub mod fs_warehouse;

use std::{io::Write, path::Path};

use tempfile::NamedTempFile;

/// Write `bytes` next to `path` and rename over it, so readers never see a partial file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
