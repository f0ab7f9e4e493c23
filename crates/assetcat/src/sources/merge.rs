//! Field-level merging of same-id sources across origins.
//!
//! Later origins have higher priority. A field in the higher-priority record
//! wins only when it is explicitly set; otherwise the lower-priority value
//! falls through.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::error::ConfigError;
use super::resource::{CatalogSource, NamedQueries};

/// Merges `over` onto `base`.
///
/// - `id` always comes from `over`.
/// - Strings override when non-empty.
/// - Options and lists override when set; an empty list is an explicit value.
/// - `properties` is replaced wholesale, never deep-merged.
/// - `origin` follows whichever record last supplied `type` or `properties`.
pub fn merge_source(base: &CatalogSource, over: &CatalogSource) -> CatalogSource {
    let mut merged = base.clone();
    merged.id = over.id.clone();

    if !over.name.is_empty() {
        merged.name = over.name.clone();
    }
    if over.enabled.is_some() {
        merged.enabled = over.enabled;
    }
    if over.labels.is_some() {
        merged.labels = over.labels.clone();
    }
    if over.included.is_some() {
        merged.included = over.included.clone();
    }
    if over.excluded.is_some() {
        merged.excluded = over.excluded.clone();
    }
    if !over.source_type.is_empty() {
        merged.source_type = over.source_type.clone();
        merged.origin = over.origin.clone();
    }
    if over.properties.is_some() {
        merged.properties = over.properties.clone();
        merged.origin = over.origin.clone();
    }

    merged
}

/// Fills fields that no origin set: `enabled = true`, `labels = []`.
pub fn apply_defaults(mut source: CatalogSource) -> CatalogSource {
    source.enabled.get_or_insert(true);
    source.labels.get_or_insert_with(Vec::new);
    source
}

/// Folds per-origin maps, lowest priority first, without applying defaults.
pub fn fold_origins<'a, I>(origins: I) -> HashMap<String, CatalogSource>
where
    I: IntoIterator<Item = &'a HashMap<String, CatalogSource>>,
{
    let mut merged: HashMap<String, CatalogSource> = HashMap::new();
    for sources in origins {
        for (id, source) in sources {
            let next = match merged.get(id) {
                Some(existing) => merge_source(existing, source),
                None => source.clone(),
            };
            merged.insert(id.clone(), next);
        }
    }
    merged
}

/// Reads each path in priority order and merges the results.
///
/// A path that fails to read is skipped with a warning. Defaults are applied
/// to every merged source.
pub fn merge_all<F>(paths: &[PathBuf], mut reader: F) -> HashMap<String, CatalogSource>
where
    F: FnMut(&Path) -> Result<HashMap<String, CatalogSource>, ConfigError>,
{
    let per_origin: Vec<HashMap<String, CatalogSource>> = paths
        .iter()
        .filter_map(|path| match reader(path) {
            Ok(sources) => Some(sources),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable source file");
                None
            }
        })
        .collect();

    fold_origins(&per_origin)
        .into_iter()
        .map(|(id, source)| (id, apply_defaults(source)))
        .collect()
}

/// Merges named queries field by field; `over` wins per field.
pub fn merge_named_queries(base: &mut NamedQueries, over: &NamedQueries) {
    for (name, query) in over {
        let target = base.entry(name.clone()).or_default();
        for (field, filter) in query {
            target.insert(field.clone(), filter.clone());
        }
    }
}
