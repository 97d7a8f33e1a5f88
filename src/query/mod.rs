pub mod validate;

pub use validate::{QueryValidator, ValidatedQuery, ValidationError};

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Spine column a series is grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrain {
    #[default]
    #[serde(alias = "daily")]
    Day,
    #[serde(alias = "weekly")]
    Week,
    #[serde(alias = "monthly")]
    Month,
    #[serde(alias = "quarterly")]
    Quarter,
    #[serde(alias = "yearly")]
    Year,
}

impl TimeGrain {
    pub fn spine_column(&self) -> &'static str {
        match self {
            TimeGrain::Day => "date_day",
            TimeGrain::Week => "date_week",
            TimeGrain::Month => "date_month",
            TimeGrain::Quarter => "date_quarter",
            TimeGrain::Year => "date_year",
        }
    }
}

/// One or more values a dimension is restricted to.
///
/// Accepts either a bare string or a list when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FilterValues(pub Vec<String>);

impl<'de> Deserialize<'de> for FilterValues {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum FilterValuesHelper {
            One(String),
            Many(Vec<String>),
        }

        Ok(match FilterValuesHelper::deserialize(deserializer)? {
            FilterValuesHelper::One(value) => FilterValues(vec![value]),
            FilterValuesHelper::Many(values) => FilterValues(values),
        })
    }
}

impl From<&str> for FilterValues {
    fn from(value: &str) -> Self {
        FilterValues(vec![value.to_string()])
    }
}

impl From<Vec<&str>> for FilterValues {
    fn from(values: Vec<&str>) -> Self {
        FilterValues(values.into_iter().map(str::to_string).collect())
    }
}

/// Canonical metric request produced by both the form and the chat path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub metric_name: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, FilterValues>,
    #[serde(default)]
    pub granularity: TimeGrain,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl StructuredQuery {
    pub fn builder(metric_name: impl Into<String>) -> QueryBuilder {
        QueryBuilder {
            metric_name: metric_name.into(),
            dimensions: Vec::new(),
            filters: BTreeMap::new(),
            granularity: TimeGrain::Day,
        }
    }
}

/// Assembles a [`StructuredQuery`]; the query is only observable once built.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    metric_name: String,
    dimensions: Vec<String>,
    filters: BTreeMap<String, FilterValues>,
    granularity: TimeGrain,
}

impl QueryBuilder {
    pub fn dimension(mut self, name: impl Into<String>) -> Self {
        self.dimensions.push(name.into());
        self
    }

    pub fn dimensions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds values for `dimension`, merging with values already present.
    pub fn filter(mut self, dimension: impl Into<String>, values: impl Into<FilterValues>) -> Self {
        let values = values.into();
        self.filters
            .entry(dimension.into())
            .and_modify(|existing| existing.0.extend(values.0.iter().cloned()))
            .or_insert(values);
        self
    }

    pub fn granularity(mut self, granularity: TimeGrain) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn range(self, start_date: NaiveDate, end_date: NaiveDate) -> StructuredQuery {
        StructuredQuery {
            metric_name: self.metric_name,
            dimensions: self.dimensions,
            filters: self.filters,
            granularity: self.granularity,
            start_date,
            end_date,
        }
    }
}
