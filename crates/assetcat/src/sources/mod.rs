//! Catalog source configuration.
//!
//! Source files are YAML documents listing `catalogs` (ingestion points) and
//! optional `namedQueries`. Several files layer on top of each other: later
//! files override earlier ones field by field.

mod collection;
mod error;
mod loader;
mod merge;
mod resource;
mod validation;

pub use collection::{SourceCollection, NO_LABELS};
pub use error::{ConfigError, Result};
pub use loader::{load_file, parse_config, read_sources};
pub use merge::{apply_defaults, fold_origins, merge_all, merge_named_queries, merge_source};
pub use resource::{
    CatalogSource, FieldFilter, NamedQueries, NamedQuery, ParsedConfig, SourceFile,
    SourceProperties,
};
pub use validation::{validate_named_queries, Operator};
