//! Error taxonomy for the caching core.
//!
//! Per-item and per-cycle failures are isolated: one content identifier's
//! fetch or scoring failure never aborts the rest of the cycle. Only
//! configuration errors (see `config::ConfigError`) are fatal at startup.

/// Catalog or access-log failure. Logged, operation aborted for the
/// current item or cycle, never fatal to the process.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("content {0} not found")]
    NotFound(i64),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

/// Peer directory, feed, or fetch transport failure. Retried up to a small
/// bounded count, after which the affected content identifier is excluded
/// from the current cycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("origin returned HTTP {0}")]
    Status(u16),

    #[error("IO error: {0}")]
    Io(String),
}

/// Model retraining failure. The previously fitted model stays in force.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelFitError {
    #[error("not enough training samples ({got} < {need})")]
    NotEnoughSamples { got: usize, need: usize },

    #[error("singular normal equations, regression has no unique solution")]
    Singular,

    #[error("non-finite value in training data for content {0}")]
    NonFinite(i64),

    #[error("training data unavailable: {0}")]
    Data(String),
}
