use crate::query::{FilterValues, TimeGrain};
use crate::semantic_model::Catalog;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Term {term:?} matches several catalog entries: {}", candidates.join(", "))]
    Ambiguous {
        term: String,
        candidates: Vec<String>,
    },
}

/// Untrusted structured reading of a question, as returned by a provider.
///
/// Names may be labels or synonyms; they are resolved through the catalog
/// and validated before anything is compiled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCandidate {
    #[serde(default)]
    pub metric_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dimensions: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filters: BTreeMap<String, FilterValues>,
    /// Relative phrase such as `最近7天` or `last month`.
    #[serde(default, alias = "time_keyword")]
    pub time_phrase: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default, alias = "time_granularity")]
    pub granularity: Option<TimeGrain>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// What a provider is told about the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogHint {
    pub metrics: Vec<HintEntry>,
    pub dimensions: Vec<HintEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HintEntry {
    pub name: String,
    pub label: String,
    pub description: String,
    pub synonyms: Vec<String>,
    /// Closed value set; empty for metrics and open dimensions.
    pub values: Vec<String>,
}

impl CatalogHint {
    pub fn from_catalog(catalog: &Catalog) -> Self {
        CatalogHint {
            metrics: catalog
                .list_metrics()
                .iter()
                .map(|m| HintEntry {
                    name: m.name.clone(),
                    label: m.label.clone(),
                    description: m.description.clone(),
                    synonyms: m.synonyms.clone(),
                    values: vec![],
                })
                .collect(),
            dimensions: catalog
                .list_dimensions()
                .iter()
                .map(|d| HintEntry {
                    name: d.name.clone(),
                    label: d.label.clone(),
                    description: d.description.clone(),
                    synonyms: d.synonyms.clone(),
                    values: d.values.clone(),
                })
                .collect(),
        }
    }

    /// Plain-text listing used in LLM prompts.
    pub fn render(&self) -> String {
        let mut out = String::from("Metrics:\n");
        for metric in &self.metrics {
            render_entry(&mut out, metric);
        }
        out.push_str("Dimensions:\n");
        for dimension in &self.dimensions {
            render_entry(&mut out, dimension);
        }
        out
    }
}

fn render_entry(out: &mut String, entry: &HintEntry) {
    let _ = write!(out, "- {}: {}", entry.name, entry.label);
    if !entry.description.is_empty() {
        let _ = write!(out, " ({})", entry.description);
    }
    if !entry.synonyms.is_empty() {
        let _ = write!(out, "; synonyms: {}", entry.synonyms.join(", "));
    }
    if !entry.values.is_empty() {
        let _ = write!(out, "; values: {}", entry.values.join(", "));
    }
    out.push('\n');
}

/// Turns free text into a [`ParsedCandidate`].
///
/// Implementations are selected by [`ParseProvider::id`] at request time.
#[async_trait]
pub trait ParseProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn parse(&self, text: &str, hint: &CatalogHint) -> Result<ParsedCandidate, ProviderError>;
}
