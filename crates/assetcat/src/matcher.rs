//! Include/exclude name filtering for ingested assets.
//!
//! Patterns use `*` as the only wildcard. Everything else matches literally,
//! case-insensitively, against the whole name.

use regex::Regex;
use thiserror::Error;

use crate::sources::CatalogSource;

/// Errors from compiling a pattern list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Empty {list} pattern at position {index}")]
    Empty { list: &'static str, index: usize },

    #[error("Pattern '{0}' is both included and excluded")]
    Conflict(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    Invalid { pattern: String, reason: String },
}

/// Compiled include/exclude filter for asset names.
///
/// A source with no patterns at all has no filter; use [`is_allowed`] to
/// treat that case as "allow everything".
#[derive(Debug, Clone)]
pub struct NameFilter {
    included: Vec<Regex>,
    excluded: Vec<Regex>,
}

impl NameFilter {
    /// Compiles include and exclude lists.
    ///
    /// Returns `Ok(None)` when both lists are empty.
    pub fn build(included: &[String], excluded: &[String]) -> Result<Option<Self>, PatternError> {
        let included_trimmed = trimmed(included, "include")?;
        let excluded_trimmed = trimmed(excluded, "exclude")?;

        if let Some(conflict) = included_trimmed
            .iter()
            .find(|p| excluded_trimmed.contains(*p))
        {
            return Err(PatternError::Conflict(conflict.to_string()));
        }

        if included_trimmed.is_empty() && excluded_trimmed.is_empty() {
            return Ok(None);
        }

        Ok(Some(Self {
            included: compile_all(&included_trimmed)?,
            excluded: compile_all(&excluded_trimmed)?,
        }))
    }

    /// Compiles the patterns declared on a source.
    pub fn for_source(source: &CatalogSource) -> Result<Option<Self>, PatternError> {
        Self::build(source.included(), source.excluded())
    }

    /// Returns whether `name` passes the filter.
    ///
    /// With include patterns present the name must match at least one.
    /// Any exclude match rejects the name regardless of inclusion.
    pub fn allows(&self, name: &str) -> bool {
        if !self.included.is_empty() && !self.included.iter().any(|re| re.is_match(name)) {
            return false;
        }
        !self.excluded.iter().any(|re| re.is_match(name))
    }
}

/// Applies an optional filter; a missing filter allows every name.
pub fn is_allowed(filter: Option<&NameFilter>, name: &str) -> bool {
    filter.map_or(true, |f| f.allows(name))
}

fn trimmed<'a>(patterns: &'a [String], list: &'static str) -> Result<Vec<&'a str>, PatternError> {
    patterns
        .iter()
        .enumerate()
        .map(|(index, p)| {
            let p = p.trim();
            if p.is_empty() {
                Err(PatternError::Empty { list, index })
            } else {
                Ok(p)
            }
        })
        .collect()
}

fn compile_all(patterns: &[&str]) -> Result<Vec<Regex>, PatternError> {
    patterns.iter().map(|p| compile(p)).collect()
}

fn compile(pattern: &str) -> Result<Regex, PatternError> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    Regex::new(&format!("(?is)^{}$", body)).map_err(|e| PatternError::Invalid {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}
