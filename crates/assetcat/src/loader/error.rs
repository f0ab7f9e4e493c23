//! Loader errors.

use thiserror::Error;

use crate::monitor::WatchError;
use crate::sources::ConfigError;
use crate::store::StoreError;

/// Errors surfaced by [`super::Loader`].
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("Persistence failed during reconciliation: {0}")]
    Store(#[from] StoreError),

    #[error("Leadership lock failed: {0}")]
    Lock(String),

    #[error("Loader is already leader")]
    AlreadyLeader,

    #[error("Loader has not been started")]
    NotStarted,

    #[error("Loader is shutting down")]
    ShuttingDown,
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;
