use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    #[serde(alias = "average")]
    Avg,
    Count,
    Ratio,
}

impl Default for Aggregation {
    fn default() -> Self {
        Aggregation::Sum
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MetricDefinition {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub aggregation: Aggregation,
    pub source_column: String,
    /// Only set for [`Aggregation::Ratio`] metrics.
    #[serde(default)]
    pub denominator_column: Option<String>,
    #[serde(default)]
    pub allowed_dimensions: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl MetricDefinition {
    pub fn allows_dimension(&self, dimension: &str) -> bool {
        self.allowed_dimensions.iter().any(|d| d == dimension)
    }

    /// Renders the aggregate expression over already-resolved column references.
    ///
    /// Days without fact rows reach the aggregate as NULL inputs, so `sum` is
    /// coalesced to zero while `avg` and `ratio` stay NULL. A ratio whose
    /// denominator sums to zero yields NULL instead of a division error.
    pub fn render_aggregate(&self, input: &str, denominator: &str) -> String {
        match self.aggregation {
            Aggregation::Sum => format!("COALESCE(SUM({}), 0)", input),
            Aggregation::Avg => format!("AVG({})", input),
            Aggregation::Count => format!("COUNT({})", input),
            Aggregation::Ratio => format!(
                "CAST(SUM({}) AS DOUBLE PRECISION) / NULLIF(SUM({}), 0)",
                input, denominator
            ),
        }
    }
}

/// Listing shape handed to the presentation layer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MetricSummary {
    pub name: String,
    pub label: String,
    pub unit: String,
    pub description: String,
}

impl From<&MetricDefinition> for MetricSummary {
    fn from(metric: &MetricDefinition) -> Self {
        MetricSummary {
            name: metric.name.clone(),
            label: metric.label.clone(),
            unit: metric.unit.clone(),
            description: metric.description.clone(),
        }
    }
}
