//! Test harness for isolated loader runs.
//!
//! The `TestHarness` owns a temporary config directory, a change monitor and
//! an in-memory store shared by every sub-loader it builds.

#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use assetcat::provider::{AssetKind, ProviderRegistry};
use assetcat::store::{AssetFilter, AssetStore, MemoryAssetStore};
use assetcat::{ChangeMonitor, Loader, LoaderConfig, SubLoader};

/// How long `eventually` waits for a condition.
pub const SETTLE: Duration = Duration::from_secs(10);

/// How long a quiet period lasts when asserting nothing happens.
pub const QUIET: Duration = Duration::from_millis(500);

pub struct TestHarness {
    temp_dir: TempDir,
    /// Directory holding source and catalog files.
    pub config_dir: PathBuf,
    pub monitor: Arc<ChangeMonitor>,
    pub store: Arc<MemoryAssetStore>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config_dir = temp_dir.path().join("config");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        Self {
            temp_dir,
            config_dir,
            monitor: Arc::new(ChangeMonitor::new().expect("Failed to create monitor")),
            store: Arc::new(MemoryAssetStore::new()),
        }
    }

    /// Writes `content` to `name` in the config directory.
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.config_dir.join(name);
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// A sub-loader with the built-in providers over the shared store.
    pub fn sub_loader(&self, kind: AssetKind, paths: Vec<PathBuf>) -> SubLoader {
        let providers = ProviderRegistry::with_defaults(kind, Some(Arc::clone(&self.monitor)));
        let store: Arc<dyn AssetStore> = self.store.clone();
        SubLoader::new(kind, paths, providers, store)
    }

    pub fn loader(&self, subs: Vec<SubLoader>) -> Loader {
        Loader::new(
            Arc::clone(&self.monitor),
            subs,
            LoaderConfig {
                drain_timeout: Duration::from_secs(2),
            },
        )
    }

    /// Persisted names of `kind` from `source_id`, sorted.
    pub async fn names(&self, kind: AssetKind, source_id: &str) -> Vec<String> {
        self.store
            .list(&AssetFilter::for_source(kind, source_id))
            .await
            .expect("Failed to list records")
            .into_iter()
            .map(|r| r.name)
            .collect()
    }

    /// Waits until the persisted names of `source_id` equal `expected`.
    pub async fn wait_for_names(
        &self,
        kind: AssetKind,
        source_id: &str,
        expected: &[&str],
    ) -> bool {
        eventually(|| async move { self.names(kind, source_id).await == expected }).await
    }
}

/// Polls `check` until it returns true or `SETTLE` elapses.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + SETTLE;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
