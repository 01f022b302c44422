use thiserror::Error;

use crate::storage::StorageError;

/// Errors that abort a run. Per-operation failures never surface here;
/// they are recorded as failed samples instead.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("setup failed: {0}")]
    Setup(String),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
