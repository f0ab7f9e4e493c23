//! Concurrency-safe aggregate of sources contributed by several origins.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::merge::{apply_defaults, fold_origins, merge_named_queries, merge_source};
use super::resource::{CatalogSource, NamedQueries, ParsedConfig};

/// Label value that selects sources without any labels.
pub const NO_LABELS: &str = "null";

#[derive(Debug, Clone, Default)]
struct OriginEntry {
    origin: PathBuf,
    sources: HashMap<String, CatalogSource>,
    named_queries: NamedQueries,
}

/// Sources and named queries from every origin, merged on read.
///
/// Origins are kept in priority order, lowest first. Re-registering an origin
/// replaces its whole contribution; origins not seen before are appended and
/// so take the highest priority unless declared up front with
/// [`SourceCollection::with_origins`].
#[derive(Debug, Default)]
pub struct SourceCollection {
    entries: RwLock<Vec<OriginEntry>>,
}

impl SourceCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collection whose origin priority is fixed by `origins`.
    pub fn with_origins<I, P>(origins: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let entries = origins
            .into_iter()
            .map(|origin| OriginEntry {
                origin: origin.into(),
                ..Default::default()
            })
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Replaces the sources contributed by `origin`.
    pub fn merge(&self, origin: &Path, sources: HashMap<String, CatalogSource>) {
        self.update(origin, |entry| entry.sources = sources);
    }

    /// Replaces the named queries contributed by `origin`.
    pub fn merge_named_queries(&self, origin: &Path, named_queries: NamedQueries) {
        self.update(origin, |entry| entry.named_queries = named_queries);
    }

    /// Replaces both sources and named queries of a parsed file in one step.
    pub fn merge_config(&self, config: ParsedConfig) {
        let ParsedConfig {
            origin,
            sources,
            named_queries,
        } = config;
        self.update(&origin, |entry| {
            entry.sources = sources;
            entry.named_queries = named_queries;
        });
    }

    /// Registered origins, lowest priority first.
    pub fn origins(&self) -> Vec<PathBuf> {
        self.read().iter().map(|e| e.origin.clone()).collect()
    }

    /// The merged view of every source, with defaults applied.
    pub fn all(&self) -> BTreeMap<String, CatalogSource> {
        let entries = self.read();
        fold_origins(entries.iter().map(|e| &e.sources))
            .into_iter()
            .map(|(id, source)| (id, apply_defaults(source)))
            .collect()
    }

    /// The merged view of one source.
    pub fn get(&self, id: &str) -> Option<CatalogSource> {
        let entries = self.read();
        let contributions = entries.iter().filter_map(|e| e.sources.get(id));

        let mut merged: Option<CatalogSource> = None;
        for source in contributions {
            merged = Some(match merged {
                Some(base) => merge_source(&base, source),
                None => source.clone(),
            });
        }
        merged.map(apply_defaults)
    }

    /// Ids of every known source, enabled or not.
    pub fn ids(&self) -> HashSet<String> {
        self.read()
            .iter()
            .flat_map(|e| e.sources.keys().cloned())
            .collect()
    }

    /// Ids of sources that are enabled in the merged view.
    pub fn enabled_ids(&self) -> HashSet<String> {
        self.all()
            .into_iter()
            .filter(|(_, s)| s.is_enabled())
            .map(|(id, _)| id)
            .collect()
    }

    /// Sources carrying any of `labels`, compared case-insensitively.
    ///
    /// Requesting [`NO_LABELS`] selects sources whose label list is empty.
    pub fn by_label(&self, labels: &[&str]) -> Vec<CatalogSource> {
        let wanted: HashSet<String> = labels.iter().map(|l| l.to_lowercase()).collect();
        let want_unlabeled = wanted.contains(NO_LABELS);

        self.all()
            .into_values()
            .filter(|source| {
                if source.labels().is_empty() {
                    return want_unlabeled;
                }
                source
                    .labels()
                    .iter()
                    .any(|l| wanted.contains(&l.to_lowercase()))
            })
            .collect()
    }

    /// Named queries of every origin, unioned field by field.
    pub fn named_queries(&self) -> NamedQueries {
        let mut merged = NamedQueries::new();
        for entry in self.read().iter() {
            merge_named_queries(&mut merged, &entry.named_queries);
        }
        merged
    }

    fn update(&self, origin: &Path, apply: impl FnOnce(&mut OriginEntry)) {
        let mut entries = self.write();
        match entries.iter_mut().find(|e| e.origin == origin) {
            Some(entry) => apply(entry),
            None => {
                let mut entry = OriginEntry {
                    origin: origin.to_path_buf(),
                    ..Default::default()
                };
                apply(&mut entry);
                entries.push(entry);
            }
        }
    }

    // The guarded data is replaced wholesale by every writer, so a poisoned
    // lock still holds a consistent value.
    fn read(&self) -> RwLockReadGuard<'_, Vec<OriginEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<OriginEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
