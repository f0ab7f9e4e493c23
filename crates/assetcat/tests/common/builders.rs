//! Builders for source files and local catalog files.

#![allow(dead_code)]

use assetcat::provider::AssetKind;
use assetcat::sources::{CatalogSource, FieldFilter, SourceFile};

/// Builder for one catalog source entry.
pub struct SourceBuilder {
    source: CatalogSource,
}

impl SourceBuilder {
    /// A `yaml` source reading `catalog`, relative to the source file.
    pub fn yaml(id: &str, catalog: &str) -> Self {
        Self {
            source: CatalogSource::new(id)
                .with_type("yaml")
                .with_property("yamlCatalogPath", catalog),
        }
    }

    /// A bare override carrying only the id.
    pub fn overriding(id: &str) -> Self {
        Self {
            source: CatalogSource::new(id),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.source.name = name.to_string();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.source.enabled = Some(enabled);
        self
    }

    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.source.labels = Some(labels.iter().map(|l| l.to_string()).collect());
        self
    }

    pub fn include(mut self, pattern: &str) -> Self {
        self.source
            .included
            .get_or_insert_with(Vec::new)
            .push(pattern.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.source
            .excluded
            .get_or_insert_with(Vec::new)
            .push(pattern.to_string());
        self
    }

    pub fn build(self) -> CatalogSource {
        self.source
    }
}

/// Builder for a whole source file.
#[derive(Default)]
pub struct SourceFileBuilder {
    file: SourceFile,
}

impl SourceFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: SourceBuilder) -> Self {
        self.file.catalogs.push(source.build());
        self
    }

    pub fn named_query(mut self, query: &str, field: &str, operator: &str, value: &str) -> Self {
        self.file
            .named_queries
            .entry(query.to_string())
            .or_default()
            .insert(field.to_string(), FieldFilter::new(operator, value));
        self
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(&self.file).expect("Failed to serialize source file")
    }
}

/// A local catalog listing `names` for `kind`.
pub fn catalog_yaml(kind: AssetKind, names: &[&str]) -> String {
    let mut out = format!("{}:\n", kind.catalog_key());
    for name in names {
        out.push_str(&format!("  - name: {}\n    description: {} asset\n", name, name));
    }
    out
}
