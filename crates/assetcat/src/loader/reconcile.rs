//! Per-kind source loading and reconciliation passes.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::inflight::InFlight;
use crate::matcher::{is_allowed, NameFilter};
use crate::provider::{
    AssetKind, AssetProvider, ProviderRecord, ProviderRegistry, StreamItem, STREAM_CAPACITY,
};
use crate::sources::{fold_origins, load_file, CatalogSource, ConfigError, SourceCollection};
use crate::store::{AssetFilter, AssetRecord, AssetStore, StoreError};

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Records written to the store.
    pub saved: usize,
    /// Records rejected by the source's name filter.
    pub filtered: usize,
    /// Records the store failed to save.
    pub failed: usize,
    /// Completed batches.
    pub batches: usize,
    /// Records removed as orphans after a completed batch.
    pub orphans_removed: usize,
}

/// Loads the sources of one asset kind and reconciles its records.
///
/// Config paths are listed lowest priority first.
pub struct SubLoader {
    kind: AssetKind,
    paths: Vec<PathBuf>,
    sources: SourceCollection,
    providers: ProviderRegistry,
    store: Arc<dyn AssetStore>,
    current_pass: Mutex<Option<CancellationToken>>,
}

impl SubLoader {
    pub fn new(
        kind: AssetKind,
        paths: Vec<PathBuf>,
        providers: ProviderRegistry,
        store: Arc<dyn AssetStore>,
    ) -> Self {
        Self {
            kind,
            sources: SourceCollection::with_origins(paths.iter().cloned()),
            paths,
            providers,
            store,
            current_pass: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// The merged in-memory view of this kind's sources.
    pub fn sources(&self) -> &SourceCollection {
        &self.sources
    }

    /// Re-parses every config path, then replaces each origin's contribution.
    ///
    /// Nothing is replaced unless every file parses and every merged source
    /// has valid patterns, so a bad edit leaves the previous view intact.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let parsed = self
            .paths
            .iter()
            .map(|path| load_file(path))
            .collect::<Result<Vec<_>, _>>()?;

        // Layers can combine into a conflict no single file has.
        for source in fold_origins(parsed.iter().map(|config| &config.sources)).values() {
            NameFilter::for_source(source).map_err(|e| ConfigError::Pattern {
                source_id: source.id.clone(),
                source: e,
            })?;
        }

        for config in parsed {
            self.sources.merge_config(config);
        }
        debug!(kind = %self.kind, sources = self.sources.ids().len(), "Sources reloaded");
        Ok(())
    }

    /// Ids of sources currently enabled for this kind.
    pub fn enabled_ids(&self) -> HashSet<String> {
        self.sources.enabled_ids()
    }

    /// Deletes every record whose source id is not in `keep`.
    ///
    /// `keep` must be the union of enabled ids across every loader sharing
    /// the store, or this loader would delete sources it cannot see.
    pub async fn remove_stale_sources(
        &self,
        keep: &HashSet<String>,
        inflight: &InFlight,
    ) -> Result<Vec<String>, StoreError> {
        let _guard = inflight.start();
        let persisted = self.store.distinct_source_ids().await?;

        let mut stale: Vec<String> = persisted.difference(keep).cloned().collect();
        stale.sort();
        for source_id in &stale {
            let deleted = self.store.delete_by_source(source_id).await?;
            info!(kind = %self.kind, source_id = %source_id, deleted, "Removed records of stale source");
        }
        Ok(stale)
    }

    /// Starts ingesting every enabled source under a child of `parent`.
    ///
    /// A pass already running for this loader is cancelled first. The
    /// returned handle completes once every provider stream has ended (or the
    /// pass was cancelled) and all orphan cleanups have finished.
    pub fn start_pass(
        &self,
        parent: &CancellationToken,
        inflight: &InFlight,
    ) -> JoinHandle<PassSummary> {
        let token = parent.child_token();
        let previous = self
            .current_pass
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let mut filters = HashMap::new();

        for source in self.sources.all().into_values().filter(|s| s.is_enabled()) {
            let filter = match NameFilter::for_source(&source) {
                Ok(filter) => filter,
                Err(e) => {
                    warn!(source_id = %source.id, error = %e, "Skipping source with invalid patterns");
                    continue;
                }
            };
            let Some(provider) = self.providers.get(&source.source_type) else {
                warn!(
                    source_id = %source.id,
                    source_type = %source.source_type,
                    "No provider registered for source type"
                );
                continue;
            };

            filters.insert(source.id.clone(), filter);
            let span = info_span!("source", kind = %self.kind, source_id = %source.id);
            tokio::spawn(forward(provider, source, token.clone(), tx.clone()).instrument(span));
        }
        // The merged stream closes once every forwarder has dropped its sender.
        drop(tx);

        let pass = Pass {
            kind: self.kind,
            store: Arc::clone(&self.store),
            inflight: inflight.clone(),
            token,
            filters,
            loaded: HashMap::new(),
            cleanups: HashMap::new(),
            summary: PassSummary::default(),
        };
        let span = info_span!("reconcile", kind = %self.kind);
        tokio::spawn(pass.run(rx).instrument(span))
    }

    /// Cancels the running pass, if any.
    pub fn cancel_pass(&self) {
        if let Some(token) = self
            .current_pass
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

/// Drains one provider stream into the merged stream.
async fn forward(
    provider: Arc<dyn AssetProvider>,
    source: CatalogSource,
    token: CancellationToken,
    tx: mpsc::Sender<(String, StreamItem)>,
) {
    let base_dir = source.base_dir().to_path_buf();
    let mut stream = match provider.provide(token.clone(), &source, &base_dir).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, transient = e.is_transient(), "Provider failed, skipping source this pass");
            return;
        }
    };

    loop {
        let item = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            item = stream.recv() => item,
        };
        let Some(item) = item else {
            debug!("Provider stream ended");
            return;
        };

        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            sent = tx.send((source.id.clone(), item)) => sent.is_ok(),
        };
        if !sent {
            return;
        }
    }
}

struct Pass {
    kind: AssetKind,
    store: Arc<dyn AssetStore>,
    inflight: InFlight,
    token: CancellationToken,
    filters: HashMap<String, Option<NameFilter>>,
    /// Names saved per source since its last completed batch.
    loaded: HashMap<String, HashSet<String>>,
    /// Orphan cleanup still running per source. A source's next item waits
    /// for it, so a cleanup never sees records of a newer batch.
    cleanups: HashMap<String, JoinHandle<usize>>,
    summary: PassSummary,
}

impl Pass {
    async fn run(mut self, mut rx: mpsc::Receiver<(String, StreamItem)>) -> PassSummary {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                next = rx.recv() => next,
            };
            let Some((source_id, item)) = next else {
                break;
            };

            match item {
                StreamItem::Item(record) => {
                    self.await_cleanup(&source_id).await;
                    self.persist(&source_id, record).await;
                }
                StreamItem::EndOfBatch => {
                    self.await_cleanup(&source_id).await;
                    self.finish_batch(&source_id);
                }
            }
        }

        let pending: Vec<String> = self.cleanups.keys().cloned().collect();
        for source_id in pending {
            self.await_cleanup(&source_id).await;
        }
        info!(
            saved = self.summary.saved,
            filtered = self.summary.filtered,
            failed = self.summary.failed,
            orphans_removed = self.summary.orphans_removed,
            "Pass finished"
        );
        self.summary
    }

    async fn persist(&mut self, source_id: &str, record: ProviderRecord) {
        // Providers may rewrite names, so filter on what they emitted.
        let filter = self.filters.get(source_id).and_then(Option::as_ref);
        if !is_allowed(filter, &record.name) {
            debug!(source_id, name = %record.name, "Filtered out");
            self.summary.filtered += 1;
            return;
        }

        let name = record.name.clone();
        let _guard = self.inflight.start();
        match self
            .store
            .save(AssetRecord::from_provider(self.kind, source_id, record))
            .await
        {
            Ok(_) => {
                self.summary.saved += 1;
                self.loaded.entry(source_id.to_string()).or_default().insert(name);
            }
            Err(e) => {
                self.summary.failed += 1;
                warn!(source_id, name = %name, error = %e, "Failed to save record");
            }
        }
    }

    async fn await_cleanup(&mut self, source_id: &str) {
        if let Some(cleanup) = self.cleanups.remove(source_id) {
            if let Ok(removed) = cleanup.await {
                self.summary.orphans_removed += removed;
            }
        }
    }

    fn finish_batch(&mut self, source_id: &str) {
        self.summary.batches += 1;
        let loaded = self.loaded.remove(source_id).unwrap_or_default();
        let cleanup = remove_orphans(
            Arc::clone(&self.store),
            self.kind,
            source_id.to_string(),
            loaded,
            self.token.clone(),
            self.inflight.clone(),
        );
        let span = info_span!("orphans", source_id = %source_id);
        self.cleanups
            .insert(source_id.to_string(), tokio::spawn(cleanup.instrument(span)));
    }
}

/// Deletes records of `source_id` that the last batch did not report.
async fn remove_orphans(
    store: Arc<dyn AssetStore>,
    kind: AssetKind,
    source_id: String,
    loaded: HashSet<String>,
    token: CancellationToken,
    inflight: InFlight,
) -> usize {
    let _guard = inflight.start();
    let result = async {
        let persisted = store.list(&AssetFilter::for_source(kind, &source_id)).await?;
        let mut removed = 0;
        for record in persisted.into_iter().filter(|r| !loaded.contains(&r.name)) {
            if token.is_cancelled() {
                break;
            }
            if let Some(id) = record.id.as_deref() {
                store.delete_by_id(id).await?;
                debug!(name = %record.name, "Removed orphan");
                removed += 1;
            }
        }
        Ok::<_, StoreError>(removed)
    }
    .await;

    match result {
        Ok(removed) => {
            if removed > 0 {
                info!(removed, "Removed orphaned records");
            }
            removed
        }
        Err(e) => {
            warn!(error = %e, "Orphan cleanup failed");
            0
        }
    }
}
