//! Remote REST API provider.
//!
//! Models come from a Hugging Face style hub API; MCP servers from an MCP
//! registry API with cursor pagination.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use super::error::{ProviderError, Result};
use super::http::JsonClient;
use super::record::{AssetKind, ProviderRecord};
use super::{send_item, AssetProvider, RecordStream, StreamItem, STREAM_CAPACITY};
use crate::sources::CatalogSource;

const DEFAULT_MODEL_HUB: &str = "https://huggingface.co";
const DEFAULT_MCP_REGISTRY: &str = "https://registry.modelcontextprotocol.io";

/// Properties understood by `rest` sources.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RestOptions {
    /// API root. Defaults to the public hub for the provider's kind.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding a bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_page_limit() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

/// What to fetch for one model include pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ModelQuery {
    /// `org/*`: list every model of an author.
    Author(String),
    /// A name without wildcards: fetch that model.
    Exact(String),
}

/// Turns include patterns into hub queries.
///
/// The hub cannot list by arbitrary glob, so a wildcard pattern must be
/// `<author>/<anything>`; the full pattern is applied afterwards by the
/// loader's name filter.
fn model_queries(source: &CatalogSource) -> Result<Vec<ModelQuery>> {
    let unsupported = |reason: String| ProviderError::Unsupported {
        source_id: source.id.clone(),
        reason,
    };

    if source.included().is_empty() {
        return Err(unsupported(
            "model sources need includedModels naming an author or model".to_string(),
        ));
    }

    let mut queries = Vec::new();
    for pattern in source.included() {
        let pattern = pattern.trim();
        let query = if !pattern.contains('*') {
            ModelQuery::Exact(pattern.to_string())
        } else {
            match pattern.split_once('/') {
                Some((author, _)) if !author.is_empty() && !author.contains('*') => {
                    ModelQuery::Author(author.to_string())
                }
                _ => {
                    return Err(unsupported(format!(
                        "pattern '{}' must start with an author, e.g. 'org/*'",
                        pattern
                    )))
                }
            }
        };
        if !queries.contains(&query) {
            queries.push(query);
        }
    }
    Ok(queries)
}

/// Reads assets from a remote REST API.
pub struct RestProvider {
    kind: AssetKind,
}

impl RestProvider {
    pub fn new(kind: AssetKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl AssetProvider for RestProvider {
    async fn provide(
        &self,
        cancel: CancellationToken,
        source: &CatalogSource,
        _base_dir: &Path,
    ) -> Result<RecordStream> {
        let options: RestOptions = source.resolve_properties()?;
        let client = JsonClient::new(options.timeout_secs, options.api_key_env.as_deref())?;
        let kind = self.kind;
        let base_url = options
            .base_url
            .clone()
            .unwrap_or_else(|| match kind {
                AssetKind::Model => DEFAULT_MODEL_HUB.to_string(),
                AssetKind::McpServer => DEFAULT_MCP_REGISTRY.to_string(),
            })
            .trim_end_matches('/')
            .to_string();

        let fetch = match kind {
            AssetKind::Model => Fetch::Models(model_queries(source)?),
            AssetKind::McpServer => Fetch::McpServers,
        };

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let span = info_span!("rest_provider", source_id = %source.id, base_url = %base_url);
        let page_limit = options.page_limit;

        tokio::spawn(
            async move {
                let api = RestApi {
                    client,
                    base_url,
                    page_limit,
                    tx,
                    cancel,
                };
                let result = match fetch {
                    Fetch::Models(queries) => api.stream_models(&queries).await,
                    Fetch::McpServers => api.stream_servers().await,
                };
                match result {
                    Ok(true) => {
                        send_item(&api.tx, &api.cancel, StreamItem::EndOfBatch).await;
                    }
                    Ok(false) | Err(ProviderError::Cancelled) => {}
                    Err(e) => warn!(error = %e, transient = e.is_transient(), "Ingestion failed"),
                }
            }
            .instrument(span),
        );

        Ok(rx)
    }
}

enum Fetch {
    Models(Vec<ModelQuery>),
    McpServers,
}

struct RestApi {
    client: JsonClient,
    base_url: String,
    page_limit: u32,
    tx: mpsc::Sender<StreamItem>,
    cancel: CancellationToken,
}

impl RestApi {
    /// Each `stream_*` returns `Ok(false)` when the receiver went away or the
    /// pass was cancelled.
    async fn stream_models(&self, queries: &[ModelQuery]) -> Result<bool> {
        for query in queries {
            let completed = match query {
                ModelQuery::Author(author) => self.stream_author(author).await?,
                ModelQuery::Exact(name) => {
                    let url = format!("{}/api/models/{}", self.base_url, name);
                    let model = self.client.get(&url, &[], &self.cancel).await?;
                    debug!(model = %name, "Fetched model");
                    self.emit(AssetKind::Model, vec![model], &["id", "modelId"]).await
                }
            };
            if !completed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Lists every model of `author`, following `Link: rel="next"` pages.
    async fn stream_author(&self, author: &str) -> Result<bool> {
        let mut url = format!("{}/api/models", self.base_url);
        let mut params = vec![
            ("author", author.to_string()),
            ("limit", self.page_limit.to_string()),
            ("full", "true".to_string()),
        ];
        let mut visited = HashSet::new();

        loop {
            let page = self.client.get_page(&url, &params, &self.cancel).await?;
            let items = match page.body {
                Value::Array(items) => items,
                other => return Err(invalid(&url, "expected an array", &other)),
            };
            debug!(author, count = items.len(), "Fetched models");
            if !self.emit(AssetKind::Model, items, &["id", "modelId"]).await {
                return Ok(false);
            }

            visited.insert(url.clone());
            match page.next {
                // The next link carries its own query string.
                Some(next) if !visited.contains(&next) => {
                    url = next;
                    params.clear();
                }
                _ => return Ok(true),
            }
        }
    }

    async fn stream_servers(&self) -> Result<bool> {
        let url = format!("{}/v0/servers", self.base_url);
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![("limit", self.page_limit.to_string())];
            if let Some(cursor) = &cursor {
                params.push(("cursor", cursor.clone()));
            }

            let page: ServerPage = serde_json::from_value(
                self.client.get(&url, &params, &self.cancel).await?,
            )
            .map_err(|e| ProviderError::InvalidResponse {
                url: url.clone(),
                message: e.to_string(),
            })?;

            // Newer registries wrap each entry as {"server": {...}, "_meta": {...}}.
            let servers = page
                .servers
                .into_iter()
                .map(|entry| match entry {
                    Value::Object(mut map) if map.get("server").is_some_and(Value::is_object) => {
                        map.remove("server").unwrap_or(Value::Null)
                    }
                    other => other,
                })
                .collect();
            if !self.emit(AssetKind::McpServer, servers, &["name"]).await {
                return Ok(false);
            }

            match page.metadata.and_then(|m| m.next_cursor) {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next)
                }
                _ => return Ok(true),
            }
        }
    }

    async fn emit(&self, kind: AssetKind, items: Vec<Value>, name_keys: &[&str]) -> bool {
        for item in items {
            let Value::Object(object) = item else {
                continue;
            };
            let Some(record) = ProviderRecord::from_object(kind, object, name_keys) else {
                warn!("Skipping entry without a name");
                continue;
            };
            if !send_item(&self.tx, &self.cancel, StreamItem::Item(record)).await {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Deserialize)]
struct ServerPage {
    #[serde(default)]
    servers: Vec<Value>,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

#[derive(Debug, Deserialize)]
struct PageMetadata {
    #[serde(default, alias = "nextCursor")]
    next_cursor: Option<String>,
}

fn invalid(url: &str, message: &str, got: &Value) -> ProviderError {
    let kind = match got {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    ProviderError::InvalidResponse {
        url: url.to_string(),
        message: format!("{}, got {}", message, kind),
    }
}
