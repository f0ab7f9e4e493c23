//! Catalog source records and the on-disk source file schema.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use super::error::{ConfigError, Result};

/// Free-form provider properties as written in the source file.
///
/// Kept untyped on the source record; each provider resolves it into its own
/// options struct with [`CatalogSource::resolve_properties`].
pub type SourceProperties = BTreeMap<String, serde_yaml::Value>;

/// An operator-declared ingestion point.
///
/// Every field except `id` is optional so that a higher-priority file can
/// override a single field of a source declared elsewhere. Unset fields fall
/// through to lower-priority origins during merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSource {
    /// Unique key of the source across all origins.
    #[serde(default)]
    pub id: String,

    /// Human readable name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Whether the source is ingested. Defaults to `true` after merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Labels used for read-side selection. Defaults to `[]` after merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,

    /// Provider type used to ingest this source (`yaml`, `rest`, `graphql`, ...).
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub source_type: String,

    /// Provider-specific properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<SourceProperties>,

    /// Asset names to include (`*` wildcard).
    #[serde(
        default,
        rename = "includedModels",
        alias = "includedServers",
        skip_serializing_if = "Option::is_none"
    )]
    pub included: Option<Vec<String>>,

    /// Asset names to exclude (`*` wildcard). Exclusion wins over inclusion.
    #[serde(
        default,
        rename = "excludedModels",
        alias = "excludedServers",
        skip_serializing_if = "Option::is_none"
    )]
    pub excluded: Option<Vec<String>>,

    /// The file that last supplied `type` or `properties`.
    #[serde(skip)]
    pub origin: PathBuf,
}

impl CatalogSource {
    /// Creates a source with just an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Returns whether the source is enabled. Unset means enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Returns the labels, or an empty slice if unset.
    pub fn labels(&self) -> &[String] {
        self.labels.as_deref().unwrap_or(&[])
    }

    /// Returns the include patterns, or an empty slice if unset.
    pub fn included(&self) -> &[String] {
        self.included.as_deref().unwrap_or(&[])
    }

    /// Returns the exclude patterns, or an empty slice if unset.
    pub fn excluded(&self) -> &[String] {
        self.excluded.as_deref().unwrap_or(&[])
    }

    /// Directory against which relative paths in `properties` resolve.
    pub fn base_dir(&self) -> &Path {
        self.origin.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Resolves `properties` into a provider's typed options.
    ///
    /// An unset properties map resolves like an empty one, so options with
    /// only defaulted fields still succeed.
    pub fn resolve_properties<T: DeserializeOwned>(&self) -> Result<T> {
        let mapping: serde_yaml::Mapping = self
            .properties
            .iter()
            .flatten()
            .map(|(k, v)| (serde_yaml::Value::String(k.clone()), v.clone()))
            .collect();

        serde_yaml::from_value(serde_yaml::Value::Mapping(mapping)).map_err(|e| {
            ConfigError::InvalidProperties {
                source_id: self.id.clone(),
                message: e.to_string(),
            }
        })
    }

    /// Builder-style setter used by tests and programmatic callers.
    pub fn with_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = source_type.into();
        self
    }

    /// Builder-style setter for a single property.
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_yaml::Value>,
    ) -> Self {
        self.properties
            .get_or_insert_with(SourceProperties::new)
            .insert(key.into(), value.into());
        self
    }
}

/// One `field: {operator, value}` condition of a named query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub value: Option<serde_yaml::Value>,
}

impl FieldFilter {
    pub fn new(operator: impl Into<String>, value: impl Into<serde_yaml::Value>) -> Self {
        Self {
            operator: operator.into(),
            value: Some(value.into()),
        }
    }
}

/// Field name to condition.
pub type NamedQuery = BTreeMap<String, FieldFilter>;

/// Query name to query.
pub type NamedQueries = BTreeMap<String, NamedQuery>;

/// Top-level layout of one YAML document in a source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    #[serde(default)]
    pub catalogs: Vec<CatalogSource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub named_queries: NamedQueries,
}

/// The validated contribution of one origin.
#[derive(Debug, Clone, Default)]
pub struct ParsedConfig {
    /// The file the contribution was read from.
    pub origin: PathBuf,
    /// Sources keyed by id, each with `origin` set.
    pub sources: HashMap<String, CatalogSource>,
    /// Named queries declared in the file.
    pub named_queries: NamedQueries,
}
