//! Records emitted by providers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The two asset families a catalog tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Model,
    McpServer,
}

impl AssetKind {
    pub fn all() -> &'static [AssetKind] {
        &[AssetKind::Model, AssetKind::McpServer]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Model => "model",
            AssetKind::McpServer => "mcp_server",
        }
    }

    /// Key of the asset list in a local catalog file.
    pub fn catalog_key(&self) -> &'static str {
        match self {
            AssetKind::Model => "models",
            AssetKind::McpServer => "mcpServers",
        }
    }

    /// Key of the sub-entity list on one asset.
    pub fn children_key(&self) -> &'static str {
        match self {
            AssetKind::Model => "artifacts",
            AssetKind::McpServer => "tools",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "model" | "models" => Ok(AssetKind::Model),
            "mcp_server" | "mcp-server" | "mcp" | "mcpservers" => Ok(AssetKind::McpServer),
            other => Err(format!("unknown asset kind '{}'", other)),
        }
    }
}

/// Free-form asset attributes.
pub type Properties = BTreeMap<String, Value>;

/// A sub-entity of an asset: a model artifact or an MCP tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubEntity {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

/// One ingested asset plus its sub-entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SubEntity>,
}

impl ProviderRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            properties: Properties::new(),
            children: Vec::new(),
        }
    }

    /// Builds a record from a JSON object as returned by a catalog file or
    /// remote API.
    ///
    /// The name is taken from the first of `name_keys` holding a string.
    /// `description` and the kind's children list are lifted out; every
    /// other field lands in `properties`. Returns `None` without a name.
    pub fn from_object(
        kind: AssetKind,
        mut object: Map<String, Value>,
        name_keys: &[&str],
    ) -> Option<Self> {
        let name = name_keys.iter().find_map(|key| match object.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        })?;
        for key in name_keys {
            object.remove(*key);
        }

        let description = match object.remove("description") {
            Some(Value::String(s)) => Some(s),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        let children = match object.remove(kind.children_key()) {
            Some(Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .filter_map(|(index, item)| match item {
                    Value::Object(map) => Some(SubEntity::from_object(map, index)),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        Some(Self {
            name,
            description,
            properties: object.into_iter().collect(),
            children,
        })
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl SubEntity {
    /// Names a sub-entity by `name`, then `uri`, then its position.
    fn from_object(mut object: Map<String, Value>, index: usize) -> Self {
        let name = ["name", "uri"]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| index.to_string());
        object.remove("name");
        Self {
            name,
            properties: object.into_iter().collect(),
        }
    }
}

/// An element of a provider stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// One discovered asset.
    Item(ProviderRecord),
    /// Every asset of the current pass has been emitted.
    EndOfBatch,
}
