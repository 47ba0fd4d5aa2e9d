//! Error types for operator tooling.

use std::path::PathBuf;

use thiserror::Error;

use crate::db::DbError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize master_config.json: {0}")]
    Config(#[from] serde_json::Error),

    #[error("invalid worker count: {0} (must be >= 1)")]
    InvalidWorkerCount(usize),
}

impl OpsError {
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
