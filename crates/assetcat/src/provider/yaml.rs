//! Local YAML catalog provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use super::error::{ProviderError, Result};
use super::record::{AssetKind, ProviderRecord};
use super::{send_batch, AssetProvider, RecordStream, STREAM_CAPACITY};
use crate::monitor::ChangeMonitor;
use crate::sources::CatalogSource;

/// Properties understood by `yaml` sources.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct YamlOptions {
    /// Catalog file; relative paths resolve against the source's origin.
    pub yaml_catalog_path: PathBuf,
    /// Re-emit the catalog whenever the file content changes.
    #[serde(default = "default_watch")]
    pub watch: bool,
}

fn default_watch() -> bool {
    true
}

/// Reads assets from a YAML catalog file on disk.
///
/// The file lists assets under `models` or `mcpServers` depending on the
/// provider's kind. Each asset needs a `name`; `description` and the
/// `artifacts`/`tools` list are lifted out and every other field is kept as
/// a property.
pub struct YamlProvider {
    kind: AssetKind,
    monitor: Option<Arc<ChangeMonitor>>,
}

impl YamlProvider {
    pub fn new(kind: AssetKind, monitor: Option<Arc<ChangeMonitor>>) -> Self {
        Self { kind, monitor }
    }
}

#[async_trait]
impl AssetProvider for YamlProvider {
    async fn provide(
        &self,
        cancel: CancellationToken,
        source: &CatalogSource,
        base_dir: &Path,
    ) -> Result<RecordStream> {
        let options: YamlOptions = source.resolve_properties()?;
        let path = base_dir.join(&options.yaml_catalog_path);

        // Subscribe before the first read so no edit slips in between.
        let mut subscription = match (&self.monitor, options.watch) {
            (Some(monitor), true) => Some(monitor.subscribe(&path)?),
            _ => None,
        };

        let kind = self.kind;
        let first = read_catalog(&path, kind).await?;
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let span = info_span!("yaml_provider", source_id = %source.id, path = %path.display());

        tokio::spawn(
            async move {
                if !send_batch(&tx, &cancel, first).await {
                    return;
                }
                let Some(subscription) = subscription.as_mut() else {
                    return;
                };

                loop {
                    let changed = tokio::select! {
                        _ = cancel.cancelled() => return,
                        changed = subscription.changed() => changed,
                    };
                    if !changed {
                        return;
                    }

                    match read_catalog(&path, kind).await {
                        Ok(records) => {
                            debug!(count = records.len(), "Catalog changed, re-emitting");
                            if !send_batch(&tx, &cancel, records).await {
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "Keeping previous catalog"),
                    }
                }
            }
            .instrument(span),
        );

        Ok(rx)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogFile {
    #[serde(default)]
    models: Vec<Map<String, Value>>,
    #[serde(default)]
    mcp_servers: Vec<Map<String, Value>>,
}

async fn read_catalog(path: &Path, kind: AssetKind) -> Result<Vec<ProviderRecord>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ProviderError::ReadCatalog {
            path: path.to_path_buf(),
            source: e,
        })?;
    parse_catalog(&content, path, kind)
}

fn parse_catalog(content: &str, path: &Path, kind: AssetKind) -> Result<Vec<ProviderRecord>> {
    let file: Option<CatalogFile> =
        serde_yaml::from_str(content).map_err(|e| ProviderError::ParseCatalog {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    let file = file.unwrap_or_default();

    let entries = match kind {
        AssetKind::Model => file.models,
        AssetKind::McpServer => file.mcp_servers,
    };

    Ok(entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let record = ProviderRecord::from_object(kind, entry, &["name"]);
            if record.is_none() {
                warn!(path = %path.display(), index, "Skipping catalog entry without a name");
            }
            record
        })
        .collect())
}
