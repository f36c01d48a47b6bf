//! File helpers shared by the cache, snapshot and profile writers

use crate::error::{InventoryError, Result};
use std::fs;
use std::path::Path;

/// Create `dir` and its parents if missing
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .map_err(|source| InventoryError::Write { path: dir.to_path_buf(), source })?;
    }
    Ok(())
}

/// Write through a sibling temp file and rename, so readers never see a torn file
pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)
        .map_err(|source| InventoryError::Write { path: tmp.clone(), source })?;
    fs::rename(&tmp, path)
        .map_err(|source| InventoryError::Write { path: path.to_path_buf(), source })?;
    Ok(())
}

/// Remove a file, treating "already gone" as success. Returns true if removed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
