//! Remote GraphQL API provider.
//!
//! Expects a Relay-style connection named `models` or `mcpServers`:
//!
//! ```graphql
//! models(first: Int!, after: String) {
//!   nodes { name description ... }
//!   pageInfo { hasNextPage endCursor }
//! }
//! ```
//!
//! Node fields are selected with a JSON scalar `properties` plus the kind's
//! sub-entity list, so the server decides which attributes to expose.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use super::error::{ProviderError, Result};
use super::http::JsonClient;
use super::record::{AssetKind, ProviderRecord};
use super::{send_item, AssetProvider, RecordStream, StreamItem, STREAM_CAPACITY};
use crate::sources::CatalogSource;

/// Properties understood by `graphql` sources.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GraphqlOptions {
    pub endpoint: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_page_size() -> u32 {
    50
}

fn default_timeout_secs() -> u64 {
    30
}

fn connection_field(kind: AssetKind) -> &'static str {
    match kind {
        AssetKind::Model => "models",
        AssetKind::McpServer => "mcpServers",
    }
}

fn build_query(kind: AssetKind) -> String {
    let children = match kind {
        AssetKind::Model => "artifacts { name uri }",
        AssetKind::McpServer => "tools { name description }",
    };
    format!(
        "query Assets($first: Int!, $after: String) {{ {field}(first: $first, after: $after) {{ \
         nodes {{ name description properties {children} }} \
         pageInfo {{ hasNextPage endCursor }} }} }}",
        field = connection_field(kind),
        children = children,
    )
}

/// Reads assets from a remote GraphQL API.
pub struct GraphqlProvider {
    kind: AssetKind,
}

impl GraphqlProvider {
    pub fn new(kind: AssetKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl AssetProvider for GraphqlProvider {
    async fn provide(
        &self,
        cancel: CancellationToken,
        source: &CatalogSource,
        _base_dir: &Path,
    ) -> Result<RecordStream> {
        let options: GraphqlOptions = source.resolve_properties()?;
        let client = JsonClient::new(options.timeout_secs, options.api_key_env.as_deref())?;
        let kind = self.kind;

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let span = info_span!("graphql_provider", source_id = %source.id, endpoint = %options.endpoint);

        tokio::spawn(
            async move {
                match stream_pages(&client, &options, kind, &tx, &cancel).await {
                    Ok(true) => {
                        send_item(&tx, &cancel, StreamItem::EndOfBatch).await;
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

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection {
    #[serde(default)]
    nodes: Vec<Value>,
    #[serde(default)]
    page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    #[serde(default)]
    end_cursor: Option<String>,
}

/// Returns `Ok(false)` if the receiver went away or the pass was cancelled.
async fn stream_pages(
    client: &JsonClient,
    options: &GraphqlOptions,
    kind: AssetKind,
    tx: &mpsc::Sender<StreamItem>,
    cancel: &CancellationToken,
) -> Result<bool> {
    let query = build_query(kind);
    let field = connection_field(kind);
    let url = options.endpoint.as_str();
    let mut after: Option<String> = None;

    loop {
        let body = json!({
            "query": query,
            "variables": { "first": options.page_size, "after": after },
        });
        let raw = client.post(url, &body, cancel).await?;
        let response: GraphqlResponse =
            serde_json::from_value(raw).map_err(|e| ProviderError::InvalidResponse {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        if !response.errors.is_empty() {
            let message = response
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ProviderError::GraphQl {
                url: url.to_string(),
                message,
            });
        }

        let connection: Connection = response
            .data
            .and_then(|mut data| data.get_mut(field).map(Value::take))
            .filter(|v| !v.is_null())
            .ok_or_else(|| ProviderError::InvalidResponse {
                url: url.to_string(),
                message: format!("missing '{}' in data", field),
            })
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| ProviderError::InvalidResponse {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            })?;
        debug!(count = connection.nodes.len(), "Fetched page");

        for node in connection.nodes {
            let Some(record) = node_to_record(kind, node) else {
                warn!("Skipping node without a name");
                continue;
            };
            if !send_item(tx, cancel, StreamItem::Item(record)).await {
                return Ok(false);
            }
        }

        match connection.page_info {
            Some(PageInfo {
                has_next_page: true,
                end_cursor: Some(cursor),
            }) if after.as_deref() != Some(cursor.as_str()) => after = Some(cursor),
            _ => return Ok(true),
        }
    }
}

/// Flattens the `properties` JSON scalar into the record's properties.
fn node_to_record(kind: AssetKind, node: Value) -> Option<ProviderRecord> {
    let Value::Object(mut object) = node else {
        return None;
    };
    let extra = match object.remove("properties") {
        Some(Value::Object(map)) => map,
        _ => Default::default(),
    };
    let mut record = ProviderRecord::from_object(kind, object, &["name"])?;
    for (key, value) in extra {
        record.properties.entry(key).or_insert(value);
    }
    record.properties.retain(|_, v| !v.is_null());
    Some(record)
}
