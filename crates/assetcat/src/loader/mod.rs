//! The loader: keeps in-memory source views current and, while leader,
//! reconciles the asset store against them.
//!
//! One [`SubLoader`] exists per asset kind. Every replica parses and watches
//! the same config files (read-only standby). Only the replica granted
//! leadership writes; it loses that right when the token passed to
//! [`Loader::start_leader`] is cancelled or a persistence failure forces it
//! to relinquish.

mod error;
mod inflight;
mod leader;
mod reconcile;
mod state;

pub use error::{LoaderError, Result};
pub use inflight::{InFlight, WriteGuard};
pub use leader::{run_leader_election, LeaderLock, StandaloneLock};
pub use reconcile::{PassSummary, SubLoader};
pub use state::{apply, LoaderState, Transition};

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::monitor::{ChangeMonitor, Subscription};
use crate::provider::AssetKind;
use crate::sources::{CatalogSource, NamedQueries};

/// Default bound on waiting for in-flight writes.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for [`Loader`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// How long relinquishing leadership or shutting down waits for
    /// in-flight writes before giving up.
    pub drain_timeout: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Orchestrates the sub-loaders. Cheap to clone.
#[derive(Clone)]
pub struct Loader {
    inner: Arc<Inner>,
}

struct Inner {
    subs: Vec<SubLoader>,
    monitor: Arc<ChangeMonitor>,
    config: LoaderConfig,
    state: Mutex<LoaderState>,
    /// Leadership-scoped token; `Some` only while leader.
    session: Mutex<Option<CancellationToken>>,
    /// Failure that ended the current leadership term.
    failure: Mutex<Option<LoaderError>>,
    inflight: InFlight,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    /// Serializes reloads so that parsing every sub-loader completes before
    /// any of them computes its reconciliation set.
    reload: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Loader {
    pub fn new(monitor: Arc<ChangeMonitor>, subs: Vec<SubLoader>, config: LoaderConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                subs,
                monitor,
                config,
                state: Mutex::new(LoaderState::Uninitialized),
                session: Mutex::new(None),
                failure: Mutex::new(None),
                inflight: InFlight::new(),
                watchers: Mutex::new(Vec::new()),
                reload: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> LoaderState {
        *lock(&self.inner.state)
    }

    pub fn is_leader(&self) -> bool {
        self.state() == LoaderState::Leader
    }

    /// Number of store writes currently in progress.
    pub fn in_flight_writes(&self) -> usize {
        self.inner.inflight.count()
    }

    pub fn sub_loader(&self, kind: AssetKind) -> Option<&SubLoader> {
        self.inner.subs.iter().find(|s| s.kind() == kind)
    }

    /// Merged sources of `kind`, defaults applied.
    pub fn sources(&self, kind: AssetKind) -> BTreeMap<String, CatalogSource> {
        self.sub_loader(kind)
            .map(|s| s.sources().all())
            .unwrap_or_default()
    }

    /// Merged named queries of `kind`.
    pub fn named_queries(&self, kind: AssetKind) -> NamedQueries {
        self.sub_loader(kind)
            .map(|s| s.sources().named_queries())
            .unwrap_or_default()
    }

    /// Parses every config file and starts watching them.
    ///
    /// Parse and watch errors here are fatal. Calling this again after a
    /// successful start does nothing. Never writes to the store.
    pub async fn start_read_only(&self) -> Result<()> {
        if self.state() != LoaderState::Uninitialized {
            self.inner.transition(Transition::StartReadOnly)?;
            return Ok(());
        }

        {
            let _reload = self.inner.reload.lock().await;
            for sub in &self.inner.subs {
                sub.reload()?;
            }
        }

        let mut subscriptions = Vec::new();
        for sub in &self.inner.subs {
            for path in sub.paths() {
                subscriptions.push(self.inner.monitor.subscribe(path)?);
            }
        }

        self.inner.transition(Transition::StartReadOnly)?;

        let mut watchers = lock(&self.inner.watchers);
        for subscription in subscriptions {
            let path = subscription.path().display().to_string();
            info!(path = %path, "Started watching source file");
            watchers.push(tokio::spawn(watch_source(Arc::downgrade(&self.inner), subscription)));
        }
        Ok(())
    }

    /// Runs one leadership term until `cancel` fires.
    ///
    /// Reloads, removes records of stale sources and starts a reconciliation
    /// pass per sub-loader before waiting. On return leadership has been
    /// relinquished and in-flight writes drained (bounded). Returns the
    /// persistence error that ended the term, if one did.
    pub async fn start_leader(&self, cancel: CancellationToken) -> Result<()> {
        let inner = &self.inner;
        inner.transition(Transition::BecomeLeader)?;

        let session = cancel.child_token();
        *lock(&inner.session) = Some(session.clone());
        *lock(&inner.failure) = None;
        info!("Acquired leadership, reconciling");

        {
            let _reload = inner.reload.lock().await;
            inner.reload_all();
            if let Err(e) = inner.reconcile(&session).await {
                error!(error = %e, "Reconciliation failed, relinquishing leadership");
                inner.relinquish().await;
                return Err(e);
            }
        }

        session.cancelled().await;
        inner.relinquish().await;

        match lock(&inner.failure).take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stops watches and passes, then waits (bounded) for in-flight writes.
    ///
    /// Idempotent. Never fails: problems are logged.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let previous = {
            let mut state = lock(&inner.state);
            let previous = *state;
            *state = LoaderState::ShuttingDown;
            previous
        };
        if previous == LoaderState::ShuttingDown {
            return;
        }
        info!(previous = %previous, "Shutting down loader");

        if let Some(session) = lock(&inner.session).take() {
            session.cancel();
        }
        for sub in &inner.subs {
            sub.cancel_pass();
        }
        for watcher in lock(&inner.watchers).drain(..) {
            watcher.abort();
        }

        if !inner.inflight.wait_idle(inner.config.drain_timeout).await {
            warn!(
                pending = inner.inflight.count(),
                "In-flight writes still pending after drain timeout"
            );
        }
    }
}

impl Inner {
    fn transition(&self, transition: Transition) -> Result<LoaderState> {
        let mut state = lock(&self.state);
        let next = apply(*state, transition)?;
        *state = next;
        Ok(next)
    }

    fn leader_session(&self) -> Option<CancellationToken> {
        if *lock(&self.state) != LoaderState::Leader {
            return None;
        }
        lock(&self.session).clone()
    }

    /// Reloads every sub-loader; a failing sub-loader keeps its previous view.
    fn reload_all(&self) {
        for sub in &self.subs {
            if let Err(e) = sub.reload() {
                warn!(kind = %sub.kind(), error = %e, "Reload failed, keeping previous sources");
            }
        }
    }

    /// Removes stale sources and starts a fresh pass for every sub-loader.
    async fn reconcile(&self, session: &CancellationToken) -> Result<()> {
        let keep: HashSet<String> = self.subs.iter().flat_map(|s| s.enabled_ids()).collect();

        for sub in &self.subs {
            if session.is_cancelled() {
                return Ok(());
            }
            sub.remove_stale_sources(&keep, &self.inflight).await?;
        }
        for sub in &self.subs {
            sub.start_pass(session, &self.inflight);
        }
        Ok(())
    }

    async fn handle_change(&self, path: &Path) {
        let _reload = self.reload.lock().await;
        if *lock(&self.state) == LoaderState::ShuttingDown {
            return;
        }
        info!(path = %path.display(), "Source file changed, reloading");
        self.reload_all();

        let Some(session) = self.leader_session() else {
            return;
        };
        if let Err(e) = self.reconcile(&session).await {
            error!(error = %e, "Reconciliation failed, relinquishing leadership");
            *lock(&self.failure) = Some(e);
            session.cancel();
        }
    }

    async fn relinquish(&self) {
        if let Some(session) = lock(&self.session).take() {
            session.cancel();
        }
        if !self.inflight.wait_idle(self.config.drain_timeout).await {
            warn!(
                pending = self.inflight.count(),
                "In-flight writes still pending after drain timeout"
            );
        }
        // Shutdown may have raced us; it keeps precedence.
        if let Ok(state) = self.transition(Transition::Relinquish) {
            info!(state = %state, "Released leadership");
        }
    }
}

/// Reloads (and reconciles, while leader) on every change of one file.
async fn watch_source(inner: Weak<Inner>, mut subscription: Subscription) {
    while subscription.changed().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_change(subscription.path()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderRegistry;
    use crate::store::MemoryAssetStore;
    use tempfile::TempDir;

    fn loader(dir: &TempDir) -> Loader {
        let path = dir.path().join("models.yaml");
        std::fs::write(&path, "catalogs:\n  - id: s1\n    labels: [prod]\n").unwrap();
        let monitor = Arc::new(ChangeMonitor::new().unwrap());
        let sub = SubLoader::new(
            AssetKind::Model,
            vec![path],
            ProviderRegistry::new(),
            Arc::new(MemoryAssetStore::new()),
        );
        Loader::new(monitor, vec![sub], LoaderConfig::default())
    }

    #[tokio::test]
    async fn test_start_read_only_populates_views() {
        let dir = TempDir::new().unwrap();
        let loader = loader(&dir);
        assert_eq!(loader.state(), LoaderState::Uninitialized);

        loader.start_read_only().await.unwrap();
        assert_eq!(loader.state(), LoaderState::ReadOnlyStandby);
        assert!(loader.sources(AssetKind::Model).contains_key("s1"));
        assert!(loader.sources(AssetKind::McpServer).is_empty());

        // Second call is a no-op.
        loader.start_read_only().await.unwrap();
        assert_eq!(loader.state(), LoaderState::ReadOnlyStandby);
        loader.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_read_only_fails_on_bad_config() {
        let dir = TempDir::new().unwrap();
        let monitor = Arc::new(ChangeMonitor::new().unwrap());
        let sub = SubLoader::new(
            AssetKind::Model,
            vec![dir.path().join("missing.yaml")],
            ProviderRegistry::new(),
            Arc::new(MemoryAssetStore::new()),
        );
        let loader = Loader::new(monitor, vec![sub], LoaderConfig::default());

        let err = loader.start_read_only().await.unwrap_err();
        assert!(matches!(err, LoaderError::Config(_)));
        assert_eq!(loader.state(), LoaderState::Uninitialized);
    }

    #[tokio::test]
    async fn test_start_leader_requires_start() {
        let dir = TempDir::new().unwrap();
        let loader = loader(&dir);
        let err = loader.start_leader(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LoaderError::NotStarted));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let loader = loader(&dir);
        loader.start_read_only().await.unwrap();

        loader.shutdown().await;
        loader.shutdown().await;
        assert_eq!(loader.state(), LoaderState::ShuttingDown);
        assert!(matches!(
            loader.start_leader(CancellationToken::new()).await,
            Err(LoaderError::ShuttingDown)
        ));
    }
}
