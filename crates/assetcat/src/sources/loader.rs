//! Parsing of catalog source files.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::error::{ConfigError, Result};
use super::merge::merge_named_queries;
use super::resource::{CatalogSource, ParsedConfig, SourceFile};
use super::validation::validate_named_queries;
use crate::matcher::NameFilter;

/// Reads and validates a single source file.
pub fn load_file(path: &Path) -> Result<ParsedConfig> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_config(&content, path)
}

/// Reads only the sources of a file; the reader used by [`super::merge_all`].
pub fn read_sources(path: &Path) -> Result<HashMap<String, CatalogSource>> {
    load_file(path).map(|parsed| parsed.sources)
}

/// Parses and validates source file content.
///
/// The content may hold several YAML documents; their catalogs and named
/// queries are combined. Every source gets `origin` set to `origin`, and its
/// name patterns are compiled so that bad patterns fail here rather than at
/// ingestion time.
pub fn parse_config(content: &str, origin: &Path) -> Result<ParsedConfig> {
    let mut parsed = ParsedConfig {
        origin: origin.to_path_buf(),
        ..Default::default()
    };

    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| yaml_error(origin, e))?;
        if value.is_null() {
            continue;
        }
        let file: SourceFile = serde_yaml::from_value(value).map_err(|e| yaml_error(origin, e))?;

        for (index, mut source) in file.catalogs.into_iter().enumerate() {
            if source.id.trim().is_empty() {
                return Err(ConfigError::MissingSourceId {
                    path: origin.to_path_buf(),
                    index,
                });
            }
            if parsed.sources.contains_key(&source.id) {
                return Err(ConfigError::DuplicateSource {
                    path: origin.to_path_buf(),
                    id: source.id,
                });
            }

            NameFilter::for_source(&source).map_err(|e| ConfigError::Pattern {
                source_id: source.id.clone(),
                source: e,
            })?;

            source.origin = origin.to_path_buf();
            parsed.sources.insert(source.id.clone(), source);
        }

        merge_named_queries(&mut parsed.named_queries, &file.named_queries);
    }

    validate_named_queries(&mut parsed.named_queries)?;

    Ok(parsed)
}

fn yaml_error(path: &Path, err: serde_yaml::Error) -> ConfigError {
    ConfigError::ParseYaml {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn origin() -> PathBuf {
        PathBuf::from("/config/sources.yaml")
    }

    fn create_test_sources() -> String {
        r#"
catalogs:
  - id: granite
    name: Granite
    type: yaml
    labels: [validated]
    includedModels: ["Granite/*"]
    excludedModels: ["Granite/beta-*"]
    properties:
      yamlCatalogPath: granite.yaml
  - id: hf
    name: Hugging Face
    type: rest
    enabled: false
namedQueries:
  validation-default:
    ttft_p90:
      operator: "<"
      value: 70
"#
        .to_string()
    }

    #[test]
    fn test_parse_sources() {
        let parsed = parse_config(&create_test_sources(), &origin()).unwrap();
        assert_eq!(parsed.origin, origin());
        assert_eq!(parsed.sources.len(), 2);

        let granite = &parsed.sources["granite"];
        assert_eq!(granite.name, "Granite");
        assert_eq!(granite.origin, origin());
        assert_eq!(granite.base_dir(), Path::new("/config"));

        assert!(!parsed.sources["hf"].is_enabled());
        assert!(parsed.named_queries.contains_key("validation-default"));
    }

    #[test]
    fn test_parse_empty_content() {
        let parsed = parse_config("", &origin()).unwrap();
        assert!(parsed.sources.is_empty());
        assert!(parsed.named_queries.is_empty());

        let parsed = parse_config("# only a comment\n", &origin()).unwrap();
        assert!(parsed.sources.is_empty());
    }

    #[test]
    fn test_parse_multiple_documents() {
        let content = "catalogs:\n  - id: a\n---\ncatalogs:\n  - id: b\n";
        let parsed = parse_config(content, &origin()).unwrap();
        assert!(parsed.sources.contains_key("a"));
        assert!(parsed.sources.contains_key("b"));
    }

    #[test]
    fn test_named_queries_merged_across_documents() {
        let content = r#"
namedQueries:
  q:
    license: { operator: "=", value: mit }
---
namedQueries:
  q:
    provider: { operator: LIKE, value: "IBM%" }
"#;
        let parsed = parse_config(content, &origin()).unwrap();
        let query = &parsed.named_queries["q"];
        assert_eq!(query.len(), 2);
        assert!(query.contains_key("license"));
        assert!(query.contains_key("provider"));
    }

    #[test]
    fn test_unknown_top_level_keys_ignored() {
        let content = "version: 3\ncatalogs:\n  - id: a\n";
        let parsed = parse_config(content, &origin()).unwrap();
        assert_eq!(parsed.sources.len(), 1);
    }

    #[test]
    fn test_malformed_yaml() {
        let err = parse_config("catalogs: [", &origin()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseYaml { .. }));
    }

    #[test]
    fn test_missing_id() {
        let err = parse_config("catalogs:\n  - name: nameless\n", &origin()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSourceId { index: 0, .. }));
    }

    #[test]
    fn test_duplicate_id_in_one_file() {
        let content = "catalogs:\n  - id: a\n  - id: a\n";
        let err = parse_config(content, &origin()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSource { ref id, .. } if id == "a"));
    }

    #[test]
    fn test_conflicting_patterns_rejected_at_load() {
        let content = r#"
catalogs:
  - id: s1
    includedModels: ["a*"]
    excludedModels: ["a*"]
"#;
        let err = parse_config(content, &origin()).unwrap_err();
        assert!(matches!(err, ConfigError::Pattern { ref source_id, .. } if source_id == "s1"));
    }

    #[test]
    fn test_blank_pattern_rejected_at_load() {
        let content = "catalogs:\n  - id: s1\n    excludedServers: [\"  \"]\n";
        assert!(matches!(
            parse_config(content, &origin()),
            Err(ConfigError::Pattern { .. })
        ));
    }

    #[test]
    fn test_invalid_operator_rejected_at_load() {
        let content = r#"
namedQueries:
  q:
    f:
      operator: INVALID_OP
      value: 1
"#;
        let err = parse_config(content, &origin()).unwrap_err();
        assert!(err.to_string().contains("INVALID_OP"));
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.yaml");
        fs::write(&path, create_test_sources()).unwrap();

        let parsed = load_file(&path).unwrap();
        assert_eq!(parsed.sources["granite"].origin, path);

        let sources = read_sources(&path).unwrap();
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_file(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
