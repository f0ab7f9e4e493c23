//! Asset persistence.
//!
//! Reconciliation only talks to storage through the narrow [`AssetStore`]
//! contract. Two implementations ship with the crate: an in-memory store and
//! a SQLite store. Records are keyed by `(kind, source_id, name)`; saving a
//! record with an existing key updates it in place.

mod db;
mod error;
mod memory;
mod migrations;
mod sqlite;

pub use db::{default_database_path, Database};
pub use error::{Result, StoreError};
pub use memory::MemoryAssetStore;
pub use sqlite::SqliteAssetStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::provider::{AssetKind, Properties, ProviderRecord, SubEntity};

/// A persisted asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Store-assigned id; `None` until saved.
    pub id: Option<String>,
    pub kind: AssetKind,
    pub source_id: String,
    pub name: String,
    pub description: Option<String>,
    pub properties: Properties,
    pub children: Vec<SubEntity>,
    pub updated_at: DateTime<Utc>,
}

impl AssetRecord {
    /// Wraps a provider record for `source_id`.
    pub fn from_provider(
        kind: AssetKind,
        source_id: impl Into<String>,
        record: ProviderRecord,
    ) -> Self {
        Self {
            id: None,
            kind,
            source_id: source_id.into(),
            name: record.name,
            description: record.description,
            properties: record.properties,
            children: record.children,
            updated_at: Utc::now(),
        }
    }
}

/// Selects records by equality on any combination of fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetFilter {
    pub kind: Option<AssetKind>,
    pub source_id: Option<String>,
    pub name: Option<String>,
}

impl AssetFilter {
    /// Every record of `kind` ingested from `source_id`.
    pub fn for_source(kind: AssetKind, source_id: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            source_id: Some(source_id.into()),
            name: None,
        }
    }

    pub fn matches(&self, record: &AssetRecord) -> bool {
        self.kind.map_or(true, |k| k == record.kind)
            && self
                .source_id
                .as_deref()
                .map_or(true, |s| s == record.source_id)
            && self.name.as_deref().map_or(true, |n| n == record.name)
    }
}

/// The persistence contract used by reconciliation.
///
/// Implementations serialize conflicting writes themselves.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Records matching `filter`, ordered by name.
    async fn list(&self, filter: &AssetFilter) -> Result<Vec<AssetRecord>>;

    /// Inserts or updates `record`; returns it with its id set.
    async fn save(&self, record: AssetRecord) -> Result<AssetRecord>;

    /// Deletes one record. Deleting a missing id is not an error.
    async fn delete_by_id(&self, id: &str) -> Result<()>;

    /// Deletes every record of every kind ingested from `source_id`.
    async fn delete_by_source(&self, source_id: &str) -> Result<u64>;

    /// Every source id that has at least one record, across kinds.
    async fn distinct_source_ids(&self) -> Result<HashSet<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: AssetKind, source_id: &str, name: &str) -> AssetRecord {
        AssetRecord::from_provider(kind, source_id, ProviderRecord::new(name))
    }

    #[test]
    fn test_filter_matches() {
        let r = record(AssetKind::Model, "s1", "Granite/v1");
        assert!(AssetFilter::default().matches(&r));
        assert!(AssetFilter::for_source(AssetKind::Model, "s1").matches(&r));
        assert!(!AssetFilter::for_source(AssetKind::McpServer, "s1").matches(&r));
        assert!(!AssetFilter::for_source(AssetKind::Model, "s2").matches(&r));

        let by_name = AssetFilter {
            name: Some("Granite/v1".to_string()),
            ..Default::default()
        };
        assert!(by_name.matches(&r));
    }

    #[test]
    fn test_from_provider_keeps_payload() {
        let provided = ProviderRecord::new("m").with_property("license", "mit");
        let r = AssetRecord::from_provider(AssetKind::Model, "s", provided);
        assert_eq!(r.id, None);
        assert_eq!(r.source_id, "s");
        assert_eq!(r.properties["license"], serde_json::json!("mit"));
    }
}
