//! Asset providers turn a catalog source into a stream of asset records.
//!
//! A provider is looked up by the source's `type`. It returns a bounded
//! channel immediately and fills it from a background task: one
//! [`StreamItem::Item`] per discovered asset, then [`StreamItem::EndOfBatch`]
//! once a full pass is out. Every send races the cancellation token, so a
//! provider stops promptly when its pass is superseded or leadership is lost.

mod error;
mod graphql;
mod http;
mod record;
mod rest;
mod yaml;

pub use error::{ProviderError, Result};
pub use graphql::{GraphqlOptions, GraphqlProvider};
pub use record::{AssetKind, Properties, ProviderRecord, StreamItem, SubEntity};
pub use rest::{RestOptions, RestProvider};
pub use yaml::{YamlOptions, YamlProvider};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::monitor::ChangeMonitor;
use crate::sources::CatalogSource;

/// Capacity of the hand-off channel between a provider and the loader.
pub const STREAM_CAPACITY: usize = 64;

/// Receiving end of a provider stream. Closed when the provider is done.
pub type RecordStream = mpsc::Receiver<StreamItem>;

/// A pluggable ingestion source.
#[async_trait]
pub trait AssetProvider: Send + Sync {
    /// Starts streaming the assets of `source`.
    ///
    /// `base_dir` is the directory of the file that supplied the source's
    /// properties; relative paths in those properties resolve against it.
    /// Errors returned here are construction errors (bad properties,
    /// unreadable catalog); failures after the stream is handed out are
    /// logged by the provider and end the stream without `EndOfBatch`.
    async fn provide(
        &self,
        cancel: CancellationToken,
        source: &CatalogSource,
        base_dir: &Path,
    ) -> Result<RecordStream>;
}

/// Sends one item unless cancelled first. Returns `false` when the stream
/// should stop.
pub(crate) async fn send_item(
    tx: &mpsc::Sender<StreamItem>,
    cancel: &CancellationToken,
    item: StreamItem,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

/// Sends every record followed by `EndOfBatch`.
pub(crate) async fn send_batch(
    tx: &mpsc::Sender<StreamItem>,
    cancel: &CancellationToken,
    records: Vec<ProviderRecord>,
) -> bool {
    for record in records {
        if !send_item(tx, cancel, StreamItem::Item(record)).await {
            return false;
        }
    }
    send_item(tx, cancel, StreamItem::EndOfBatch).await
}

/// Providers keyed by source type.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AssetProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in providers for `kind`: `yaml`, `rest` and `graphql`.
    ///
    /// With a monitor, `yaml` sources re-emit whenever their catalog file
    /// changes.
    pub fn with_defaults(kind: AssetKind, monitor: Option<Arc<ChangeMonitor>>) -> Self {
        let mut registry = Self::new();
        registry.register("yaml", Arc::new(YamlProvider::new(kind, monitor)));
        registry.register("rest", Arc::new(RestProvider::new(kind)));
        registry.register("graphql", Arc::new(GraphqlProvider::new(kind)));
        registry
    }

    /// Registers `provider` for sources of `source_type`, replacing any
    /// previous one.
    pub fn register(&mut self, source_type: impl Into<String>, provider: Arc<dyn AssetProvider>) {
        self.providers.insert(source_type.into(), provider);
    }

    pub fn get(&self, source_type: &str) -> Option<Arc<dyn AssetProvider>> {
        self.providers.get(source_type).cloned()
    }

    /// Registered types, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.providers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_types() {
        let registry = ProviderRegistry::with_defaults(AssetKind::Model, None);
        assert_eq!(registry.types(), vec!["graphql", "rest", "yaml"]);
        assert!(registry.get("yaml").is_some());
        assert!(registry.get("ftp").is_none());
    }

    #[tokio::test]
    async fn test_send_batch_appends_end_marker() {
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let sent = send_batch(&tx, &cancel, vec![ProviderRecord::new("a")]).await;
        assert!(sent);
        assert_eq!(rx.recv().await, Some(StreamItem::Item(ProviderRecord::new("a"))));
        assert_eq!(rx.recv().await, Some(StreamItem::EndOfBatch));
    }

    #[tokio::test]
    async fn test_send_stops_when_cancelled() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        assert!(send_item(&tx, &cancel, StreamItem::EndOfBatch).await);

        // The channel is full; only cancellation can end this send.
        cancel.cancel();
        assert!(!send_item(&tx, &cancel, StreamItem::EndOfBatch).await);
        assert_eq!(rx.recv().await, Some(StreamItem::EndOfBatch));
    }

    #[tokio::test]
    async fn test_send_fails_when_receiver_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!send_item(&tx, &CancellationToken::new(), StreamItem::EndOfBatch).await);
    }
}
