//! Source field to destination column resolution

use serde::{Deserialize, Serialize};

use crate::ColumnDescriptor;

/// An ordered `(source field, destination column)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub destination: String,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// A mapping whose source and destination share a name
    pub fn identity(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source: name.clone(),
            destination: name,
        }
    }

    /// Whether `exclusion` removes this mapping.
    ///
    /// An exclusion matches on either side: its destination names this
    /// mapping's column, or its source names this mapping's field.
    pub fn is_excluded_by(&self, exclusion: &FieldMapping) -> bool {
        self.destination.eq_ignore_ascii_case(&exclusion.destination)
            || self.source.eq_ignore_ascii_case(&exclusion.source)
    }
}

impl<S: Into<String>, D: Into<String>> From<(S, D)> for FieldMapping {
    fn from((source, destination): (S, D)) -> Self {
        Self::new(source, destination)
    }
}

/// Column sets used by the merge statement
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeColumns {
    /// Columns assigned from the staging row when a destination row matches
    pub update: Vec<String>,
    /// Columns written when a staging row has no destination match
    pub insert: Vec<String>,
}

/// Resolves which source fields feed which destination columns
///
/// Resolution order for the load mapping:
/// 1. explicit mappings, verbatim
/// 2. with a known table schema, every non-identity column that has a
///    same-named source field
/// 3. otherwise every source field, mapped to a column of the same name
///
/// Exclusions are removed from whichever set was produced.
#[derive(Debug, Clone)]
pub struct ColumnMappingResolver<'a> {
    mappings: &'a [FieldMapping],
    exclusions: &'a [FieldMapping],
    table_schema: &'a [ColumnDescriptor],
    source_fields: Vec<&'a str>,
    strict: bool,
}

impl<'a> ColumnMappingResolver<'a> {
    pub fn new(
        source_fields: impl IntoIterator<Item = &'a str>,
        mappings: &'a [FieldMapping],
        exclusions: &'a [FieldMapping],
    ) -> Self {
        Self {
            mappings,
            exclusions,
            table_schema: &[],
            source_fields: source_fields.into_iter().collect(),
            strict: false,
        }
    }

    /// Use the inspected destination schema. An empty schema means "unknown".
    pub fn with_schema(mut self, table_schema: &'a [ColumnDescriptor]) -> Self {
        self.table_schema = table_schema;
        self
    }

    /// Restrict merge column sets to the explicit mappings
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Resolve the source-to-destination mapping used for the bulk load
    pub fn resolve(&self) -> Vec<FieldMapping> {
        self.without_exclusions(self.initial_mapping())
    }

    fn initial_mapping(&self) -> Vec<FieldMapping> {
        if !self.mappings.is_empty() {
            self.mappings.to_vec()
        } else if !self.table_schema.is_empty() {
            self.table_schema
                .iter()
                .filter(|column| !column.is_identity)
                .filter_map(|column| {
                    self.source_fields
                        .iter()
                        .find(|field| field.eq_ignore_ascii_case(&column.name))
                        .map(|field| FieldMapping::new(*field, column.name.as_str()))
                })
                .collect()
        } else {
            self.source_fields
                .iter()
                .map(|field| FieldMapping::identity(*field))
                .collect()
        }
    }

    /// Resolve the update and insert column sets for a merge keyed on `keys`
    ///
    /// Strict mode uses exactly the explicit mappings minus exclusions.
    /// Otherwise every schema column that is neither identity nor excluded
    /// participates; with no schema the resolved load mapping is used.
    /// A column is excluded when an exclusion names it, or when an exclusion
    /// removed the mapping that would have fed it from the load.
    /// Key columns never appear in the update set.
    pub fn merge_columns(&self, keys: &[String]) -> MergeColumns {
        let insert: Vec<String> = if self.strict {
            self.without_exclusions(self.mappings.to_vec())
                .into_iter()
                .map(|m| m.destination)
                .collect()
        } else if !self.table_schema.is_empty() {
            let unfed: Vec<String> = self
                .initial_mapping()
                .into_iter()
                .filter(|m| self.is_mapping_excluded(m))
                .map(|m| m.destination)
                .collect();
            self.table_schema
                .iter()
                .filter(|column| !column.is_identity)
                .filter(|column| !self.is_column_excluded(&column.name))
                .filter(|column| !unfed.iter().any(|d| d.eq_ignore_ascii_case(&column.name)))
                .map(|column| column.name.clone())
                .collect()
        } else {
            self.resolve().into_iter().map(|m| m.destination).collect()
        };

        let update = insert
            .iter()
            .filter(|column| !keys.iter().any(|k| k.eq_ignore_ascii_case(column)))
            .cloned()
            .collect();

        MergeColumns { update, insert }
    }

    fn without_exclusions(&self, mappings: Vec<FieldMapping>) -> Vec<FieldMapping> {
        mappings
            .into_iter()
            .filter(|m| !self.is_mapping_excluded(m))
            .collect()
    }

    fn is_mapping_excluded(&self, mapping: &FieldMapping) -> bool {
        self.exclusions.iter().any(|e| mapping.is_excluded_by(e))
    }

    fn is_column_excluded(&self, column: &str) -> bool {
        self.exclusions
            .iter()
            .any(|e| e.destination.eq_ignore_ascii_case(column))
    }
}
