//! Catalog source configuration errors.

use std::path::PathBuf;
use thiserror::Error;

use crate::matcher::PatternError;

/// Errors raised while reading, parsing or validating catalog source files.
///
/// Any of these aborts the parse of the file that produced it. At startup
/// that is fatal; during a triggered reload the previous state is kept.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read source file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Source #{index} in '{path}' has no id")]
    MissingSourceId { path: PathBuf, index: usize },

    #[error("Duplicate source id '{id}' in '{path}'")]
    DuplicateSource { path: PathBuf, id: String },

    #[error("Invalid name patterns for source '{source_id}': {source}")]
    Pattern {
        source_id: String,
        #[source]
        source: PatternError,
    },

    #[error("Invalid named query '{query}'{}: {reason}", field_suffix(.field))]
    InvalidNamedQuery {
        query: String,
        field: Option<String>,
        reason: String,
    },

    #[error("Invalid properties for source '{source_id}': {message}")]
    InvalidProperties { source_id: String, message: String },
}

fn field_suffix(field: &Option<String>) -> String {
    match field {
        Some(field) => format!(" field '{}'", field),
        None => String::new(),
    }
}

impl ConfigError {
    pub(crate) fn named_query(
        query: impl Into<String>,
        field: Option<&str>,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidNamedQuery {
            query: query.into(),
            field: field.map(str::to_string),
            reason: reason.into(),
        }
    }
}

/// Result type for source configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
