//! SQLite asset store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

use super::db::Database;
use super::error::{Result, StoreError};
use super::{AssetFilter, AssetRecord, AssetStore};
use crate::provider::AssetKind;

/// Stores assets in the `assets` table; payload fields are JSON columns.
///
/// Every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteAssetStore {
    db: Database,
}

impl SqliteAssetStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Opens (or creates) the database file and migrates it.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

fn from_row(row: &Row<'_>) -> Result<AssetRecord> {
    let kind: String = row.get("kind")?;
    let properties: String = row.get("properties")?;
    let children: String = row.get("children")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(AssetRecord {
        id: Some(row.get("id")?),
        kind: kind.parse::<AssetKind>().map_err(|_| StoreError::InvalidRow {
            column: "kind",
            value: kind.clone(),
        })?,
        source_id: row.get("source_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        properties: serde_json::from_str(&properties)?,
        children: serde_json::from_str(&children)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| StoreError::InvalidRow {
                column: "updated_at",
                value: updated_at.clone(),
            })?,
    })
}

fn list(db: &Database, filter: &AssetFilter) -> Result<Vec<AssetRecord>> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<String> = Vec::new();

        if let Some(kind) = filter.kind {
            param_values.push(kind.as_str().to_string());
            conditions.push(format!("kind = ?{}", param_values.len()));
        }
        if let Some(ref source_id) = filter.source_id {
            param_values.push(source_id.clone());
            conditions.push(format!("source_id = ?{}", param_values.len()));
        }
        if let Some(ref name) = filter.name {
            param_values.push(name.clone());
            conditions.push(format!("name = ?{}", param_values.len()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!("SELECT * FROM assets {} ORDER BY name", where_clause);

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(param_values.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(from_row(row)?);
        }
        Ok(records)
    })
}

fn upsert(db: &Database, mut record: AssetRecord) -> Result<AssetRecord> {
    let candidate_id = record
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let properties = serde_json::to_string(&record.properties)?;
    let children = serde_json::to_string(&record.children)?;
    let now = record.updated_at.to_rfc3339();

    let id: String = db.with_conn(|conn| {
        Ok(conn.query_row(
            "INSERT INTO assets (id, kind, source_id, name, description, properties, children,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT (kind, source_id, name) DO UPDATE SET
                description = excluded.description,
                properties = excluded.properties,
                children = excluded.children,
                updated_at = excluded.updated_at
             RETURNING id",
            params![
                candidate_id,
                record.kind.as_str(),
                record.source_id,
                record.name,
                record.description,
                properties,
                children,
                now,
            ],
            |r| r.get(0),
        )?)
    })?;

    record.id = Some(id);
    Ok(record)
}

#[async_trait]
impl AssetStore for SqliteAssetStore {
    async fn list(&self, filter: &AssetFilter) -> Result<Vec<AssetRecord>> {
        let filter = filter.clone();
        self.blocking(move |db| list(db, &filter)).await
    }

    async fn save(&self, record: AssetRecord) -> Result<AssetRecord> {
        self.blocking(move |db| upsert(db, record)).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.blocking(move |db| {
            db.with_conn(|conn| {
                conn.execute("DELETE FROM assets WHERE id = ?1", params![id])?;
                Ok(())
            })
        })
        .await
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<u64> {
        let source_id = source_id.to_string();
        self.blocking(move |db| {
            db.with_conn(|conn| {
                let deleted =
                    conn.execute("DELETE FROM assets WHERE source_id = ?1", params![source_id])?;
                Ok(deleted as u64)
            })
        })
        .await
    }

    async fn distinct_source_ids(&self) -> Result<HashSet<String>> {
        self.blocking(|db| {
            db.with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT DISTINCT source_id FROM assets")?;
                let ids = stmt
                    .query_map([], |r| r.get::<_, String>(0))?
                    .collect::<std::result::Result<HashSet<_>, _>>()?;
                Ok(ids)
            })
        })
        .await
    }
}
