pub mod dimension;
pub mod json_store;
pub mod local_store;
pub mod metric;
pub mod s3_store;

pub use dimension::{DimensionDefinition, DimensionJoin};
pub use metric::{Aggregation, MetricDefinition, MetricSummary};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The catalog document as stored by a [`SemanticModelStore`].
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SemanticModel {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub fact: FactSource,
    pub metrics: Vec<MetricDefinition>,
    pub dimensions: Vec<DimensionDefinition>,
}

/// The fact table every metric aggregates over.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct FactSource {
    /// Table name, optionally schema qualified (`main_dws.dws_toll_revenue_daily`).
    pub table: String,
    pub date_column: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Unknown dimension: {0}")]
    UnknownDimension(String),

    #[error("Metric {metric} allows dimension {dimension} which is not defined")]
    UndefinedAllowedDimension { metric: String, dimension: String },

    #[error("Duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Invalid identifier in {context}: {value:?}")]
    InvalidIdentifier { context: String, value: String },

    #[error("Ratio metric {0} needs a denominator_column")]
    MissingDenominator(String),

    #[error("Metric {0} is not a ratio but declares a denominator_column")]
    UnexpectedDenominator(String),

    #[error("Term {term:?} matches several catalog entries: {}", candidates.join(", "))]
    AmbiguousSynonym {
        term: String,
        candidates: Vec<String>,
    },
}

/// Read-only registry of metric and dimension definitions.
///
/// Built once from a [`SemanticModel`]; every invariant the compiler relies
/// on (known dimensions, plain identifiers, ratio denominators) is checked
/// here so later lookups cannot fail for structural reasons.
#[derive(Debug, Clone)]
pub struct Catalog {
    name: String,
    fact: FactSource,
    metrics: Vec<MetricDefinition>,
    metric_index: HashMap<String, usize>,
    dimensions: Vec<DimensionDefinition>,
    dimension_index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(model: SemanticModel) -> Result<Self, CatalogError> {
        check_table(&model.fact.table, "fact table")?;
        check_identifier(&model.fact.date_column, "fact date column")?;

        let mut dimension_index = HashMap::new();
        for (idx, dimension) in model.dimensions.iter().enumerate() {
            check_identifier(&dimension.name, "dimension name")?;
            check_identifier(&dimension.source_column, &dimension.name)?;
            if let Some(join) = &dimension.join {
                check_table(&join.table, &dimension.name)?;
                check_identifier(&join.foreign_key, &dimension.name)?;
                check_identifier(&join.primary_key, &dimension.name)?;
            }
            if dimension_index.insert(dimension.name.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateName {
                    kind: "dimension",
                    name: dimension.name.clone(),
                });
            }
        }

        let mut metric_index = HashMap::new();
        for (idx, metric) in model.metrics.iter().enumerate() {
            check_identifier(&metric.name, "metric name")?;
            check_identifier(&metric.source_column, &metric.name)?;
            match (metric.aggregation, &metric.denominator_column) {
                (Aggregation::Ratio, Some(denominator)) => {
                    check_identifier(denominator, &metric.name)?
                }
                (Aggregation::Ratio, None) => {
                    return Err(CatalogError::MissingDenominator(metric.name.clone()))
                }
                (_, Some(_)) => {
                    return Err(CatalogError::UnexpectedDenominator(metric.name.clone()))
                }
                (_, None) => (),
            }
            if let Some(dimension) = metric
                .allowed_dimensions
                .iter()
                .find(|d| !dimension_index.contains_key(d.as_str()))
            {
                return Err(CatalogError::UndefinedAllowedDimension {
                    metric: metric.name.clone(),
                    dimension: dimension.clone(),
                });
            }
            if metric_index.insert(metric.name.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateName {
                    kind: "metric",
                    name: metric.name.clone(),
                });
            }
        }

        debug!(
            "Catalog {} loaded: {} metrics, {} dimensions",
            model.name,
            model.metrics.len(),
            model.dimensions.len()
        );

        Ok(Catalog {
            name: model.name,
            fact: model.fact,
            metrics: model.metrics,
            metric_index,
            dimensions: model.dimensions,
            dimension_index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fact(&self) -> &FactSource {
        &self.fact
    }

    pub fn get_metric(&self, name: &str) -> Result<&MetricDefinition, CatalogError> {
        self.metric_index
            .get(name)
            .map(|&idx| &self.metrics[idx])
            .ok_or_else(|| CatalogError::UnknownMetric(name.to_string()))
    }

    pub fn get_dimension(&self, name: &str) -> Result<&DimensionDefinition, CatalogError> {
        self.dimension_index
            .get(name)
            .map(|&idx| &self.dimensions[idx])
            .ok_or_else(|| CatalogError::UnknownDimension(name.to_string()))
    }

    /// Metrics in definition order.
    pub fn list_metrics(&self) -> &[MetricDefinition] {
        &self.metrics
    }

    pub fn list_dimensions(&self) -> &[DimensionDefinition] {
        &self.dimensions
    }

    pub fn summaries(&self) -> Vec<MetricSummary> {
        self.metrics.iter().map(MetricSummary::from).collect()
    }

    /// Maps a free-text term onto a metric name.
    ///
    /// An exact name wins; otherwise labels and synonyms are compared. A term
    /// nothing matches is returned unchanged for the validator to reject.
    pub fn resolve_metric_term(&self, term: &str) -> Result<String, CatalogError> {
        resolve_term(
            term,
            self.metrics
                .iter()
                .map(|m| (m.name.as_str(), m.label.as_str(), m.synonyms.as_slice())),
        )
    }

    pub fn resolve_dimension_term(&self, term: &str) -> Result<String, CatalogError> {
        resolve_term(
            term,
            self.dimensions
                .iter()
                .map(|d| (d.name.as_str(), d.label.as_str(), d.synonyms.as_slice())),
        )
    }
}

fn resolve_term<'a, I>(term: &str, entries: I) -> Result<String, CatalogError>
where
    I: Iterator<Item = (&'a str, &'a str, &'a [String])> + Clone,
{
    let needle = term.trim().to_lowercase();
    if let Some((name, _, _)) = entries
        .clone()
        .find(|(name, _, _)| name.to_lowercase() == needle)
    {
        return Ok(name.to_string());
    }

    let candidates: Vec<String> = entries
        .filter(|(_, label, synonyms)| {
            label.to_lowercase() == needle || synonyms.iter().any(|s| s.to_lowercase() == needle)
        })
        .map(|(name, _, _)| name.to_string())
        .collect();

    match candidates.len() {
        0 => Ok(term.trim().to_string()),
        1 => Ok(candidates[0].clone()),
        _ => Err(CatalogError::AmbiguousSynonym {
            term: term.to_string(),
            candidates,
        }),
    }
}

pub(crate) fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn check_identifier(value: &str, context: &str) -> Result<(), CatalogError> {
    if is_identifier(value) {
        Ok(())
    } else {
        Err(CatalogError::InvalidIdentifier {
            context: context.to_string(),
            value: value.to_string(),
        })
    }
}

fn check_table(value: &str, context: &str) -> Result<(), CatalogError> {
    value
        .split('.')
        .try_for_each(|part| check_identifier(part, context))
        .map_err(|_| CatalogError::InvalidIdentifier {
            context: context.to_string(),
            value: value.to_string(),
        })
}

/// Source of the [`SemanticModel`] document.
///
/// Loaded once at startup; the resulting [`Catalog`] is never reloaded while
/// the process runs.
#[async_trait]
pub trait SemanticModelStore {
    async fn load_semantic_model(&self) -> Result<SemanticModel, SemanticModelStoreError>;
}

#[derive(Error, Debug)]
pub enum SemanticModelStoreError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON format: {0}")]
    InvalidJsonFormat(#[from] serde_json::Error),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Loads the model from `store` and builds the catalog from it.
pub async fn load_catalog<S>(store: &S) -> Result<Catalog, SemanticModelStoreError>
where
    S: SemanticModelStore + ?Sized,
{
    let model = store.load_semantic_model().await?;
    Ok(Catalog::new(model)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::semantic_model::local_store::LocalSemanticModelStore;
    use rstest::*;

    #[fixture]
    fn model() -> SemanticModel {
        LocalSemanticModelStore::new().semantic_model()
    }

    #[fixture]
    fn catalog(model: SemanticModel) -> Catalog {
        Catalog::new(model).unwrap()
    }

    #[rstest]
    fn test_get_metric_and_dimension(catalog: Catalog) {
        assert_eq!(catalog.get_metric("revenue").unwrap().unit, "元");
        assert_eq!(catalog.get_dimension("city").unwrap().label, "城市");
        assert_eq!(
            catalog.get_metric("gross_margin").unwrap_err(),
            CatalogError::UnknownMetric("gross_margin".to_string())
        );
        assert_eq!(
            catalog.get_dimension("nonexistent_dim").unwrap_err(),
            CatalogError::UnknownDimension("nonexistent_dim".to_string())
        );
    }

    #[rstest]
    fn test_list_metrics_keeps_definition_order(catalog: Catalog, model: SemanticModel) {
        let listed: Vec<&str> = catalog
            .list_metrics()
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        let defined: Vec<&str> = model.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(listed, defined);
        assert_eq!(catalog.summaries()[0].name, "revenue");
    }

    #[rstest]
    fn test_rejects_undefined_allowed_dimension(mut model: SemanticModel) {
        model.metrics[0]
            .allowed_dimensions
            .push("weather".to_string());
        assert_eq!(
            Catalog::new(model).unwrap_err(),
            CatalogError::UndefinedAllowedDimension {
                metric: "revenue".to_string(),
                dimension: "weather".to_string()
            }
        );
    }

    #[rstest]
    fn test_rejects_duplicate_metric(mut model: SemanticModel) {
        let duplicate = model.metrics[0].clone();
        model.metrics.push(duplicate);
        assert!(matches!(
            Catalog::new(model),
            Err(CatalogError::DuplicateName { kind: "metric", .. })
        ));
    }

    #[rstest]
    #[case::quote_in_column("amount\"; DROP TABLE x; --")]
    #[case::expression("SUM(amount)")]
    #[case::leading_digit("1amount")]
    #[case::empty("")]
    fn test_rejects_non_identifier_columns(mut model: SemanticModel, #[case] column: &str) {
        model.metrics[0].source_column = column.to_string();
        assert!(matches!(
            Catalog::new(model),
            Err(CatalogError::InvalidIdentifier { .. })
        ));
    }

    #[rstest]
    fn test_rejects_ratio_without_denominator(mut model: SemanticModel) {
        let ratio = model
            .metrics
            .iter_mut()
            .find(|m| m.aggregation == Aggregation::Ratio)
            .unwrap();
        ratio.denominator_column = None;
        assert!(matches!(
            Catalog::new(model),
            Err(CatalogError::MissingDenominator(_))
        ));
    }

    #[rstest]
    #[case::exact_name("revenue", "revenue")]
    #[case::case_insensitive_name("Revenue", "revenue")]
    #[case::label("日收费收入", "revenue")]
    #[case::synonym("日收入", "revenue")]
    #[case::unknown_passes_through("gross margin", "gross margin")]
    fn test_resolve_metric_term(catalog: Catalog, #[case] term: &str, #[case] expected: &str) {
        assert_eq!(catalog.resolve_metric_term(term).unwrap(), expected);
    }

    #[rstest]
    fn test_resolve_conflicting_synonym(mut model: SemanticModel) {
        model.metrics[1].synonyms.push("收入".to_string());
        let catalog = Catalog::new(model).unwrap();
        assert_eq!(
            catalog.resolve_metric_term("收入").unwrap_err(),
            CatalogError::AmbiguousSynonym {
                term: "收入".to_string(),
                candidates: vec!["revenue".to_string(), "transactions".to_string()],
            }
        );
    }

    #[rstest]
    #[case::synonym("城市", "city")]
    #[case::english_synonym("station", "station_name")]
    #[case::name("vehicle_type_name", "vehicle_type_name")]
    fn test_resolve_dimension_term(catalog: Catalog, #[case] term: &str, #[case] expected: &str) {
        assert_eq!(catalog.resolve_dimension_term(term).unwrap(), expected);
    }

    #[rstest]
    #[case("city", true)]
    #[case("_private", true)]
    #[case("main_dws", true)]
    #[case("a-b", false)]
    #[case("a b", false)]
    #[case("城市", false)]
    fn test_is_identifier(#[case] value: &str, #[case] expected: bool) {
        assert_eq!(is_identifier(value), expected);
    }
}
