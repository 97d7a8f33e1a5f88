use serde::{Deserialize, Serialize};

/// Lookup table a dimension column lives in, reached from the fact table by
/// `fact.foreign_key = table.primary_key`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct DimensionJoin {
    pub table: String,
    pub foreign_key: String,
    pub primary_key: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct DimensionDefinition {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub source_column: String,
    #[serde(default)]
    pub join: Option<DimensionJoin>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// Closed set of filterable values. Empty means any value is accepted.
    #[serde(default)]
    pub values: Vec<String>,
}

impl DimensionDefinition {
    pub fn accepts_value(&self, value: &str) -> bool {
        self.values.is_empty() || self.values.iter().any(|v| v == value)
    }
}
