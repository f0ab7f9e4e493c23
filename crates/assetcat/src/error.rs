use thiserror::Error;

use crate::loader::LoaderError;
use crate::monitor::WatchError;
use crate::provider::ProviderError;
use crate::sources::ConfigError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
