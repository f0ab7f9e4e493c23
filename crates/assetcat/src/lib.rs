pub mod error;
pub mod loader;
pub mod matcher;
pub mod monitor;
pub mod provider;
pub mod sources;
pub mod store;

pub use error::{CatalogError, Result};
pub use loader::{
    run_leader_election, LeaderLock, Loader, LoaderConfig, LoaderError, LoaderState, StandaloneLock,
    SubLoader,
};
pub use matcher::{NameFilter, PatternError};
pub use monitor::{ChangeMonitor, Subscription, WatchError};
pub use provider::{
    AssetKind, AssetProvider, ProviderError, ProviderRecord, ProviderRegistry, StreamItem,
};
pub use sources::{merge_all, read_sources, CatalogSource, ConfigError, SourceCollection};
pub use store::{
    AssetFilter, AssetRecord, AssetStore, MemoryAssetStore, SqliteAssetStore, StoreError,
};
