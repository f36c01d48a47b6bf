//! Error type for the inventory engine surface

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    /// Caller handed the engine something it must never receive
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, InventoryError>;
