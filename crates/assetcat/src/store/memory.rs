//! In-memory asset store.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

use super::error::{Result, StoreError};
use super::{AssetFilter, AssetRecord, AssetStore};

/// Keeps records in a map keyed by id. Used by tests and `--in-memory` runs.
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    records: RwLock<HashMap<String, AssetRecord>>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn list(&self, filter: &AssetFilter) -> Result<Vec<AssetRecord>> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut matched: Vec<AssetRecord> = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matched)
    }

    async fn save(&self, mut record: AssetRecord) -> Result<AssetRecord> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;

        let existing = records
            .values()
            .find(|r| {
                r.kind == record.kind && r.source_id == record.source_id && r.name == record.name
            })
            .and_then(|r| r.id.clone());
        let id = existing
            .or_else(|| record.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        record.id = Some(id.clone());
        records.insert(id, record.clone());
        Ok(record)
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        self.records
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .remove(id);
        Ok(())
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<u64> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let before = records.len();
        records.retain(|_, r| r.source_id != source_id);
        Ok((before - records.len()) as u64)
    }

    async fn distinct_source_ids(&self) -> Result<HashSet<String>> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.values().map(|r| r.source_id.clone()).collect())
    }
}
