use crate::date_spine::{DateSpine, SpineError};
use crate::query::{FilterValues, StructuredQuery};
use crate::semantic_model::Catalog;
use chrono::NaiveDate;
use log::debug;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Dimension {dimension} is not allowed for metric {metric}")]
    DimensionNotAllowed { dimension: String, metric: String },

    #[error("Filter on {0} has no values")]
    EmptyFilter(String),

    #[error("Value {value:?} is not a known {dimension}")]
    InvalidFilterValue { dimension: String, value: String },

    #[error("Invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Date {date} is outside the supported horizon {start} to {end}")]
    OutOfHorizon {
        date: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    },
}

impl ValidationError {
    /// Stable name used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::UnknownMetric(_) => "UnknownMetric",
            ValidationError::DimensionNotAllowed { .. } => "DimensionNotAllowed",
            ValidationError::EmptyFilter(_) => "EmptyFilter",
            ValidationError::InvalidFilterValue { .. } => "InvalidFilterValue",
            ValidationError::InvalidRange { .. } => "InvalidRange",
            ValidationError::OutOfHorizon { .. } => "OutOfHorizon",
        }
    }
}

impl From<SpineError> for ValidationError {
    fn from(err: SpineError) -> Self {
        match err {
            SpineError::InvalidRange { start, end } => ValidationError::InvalidRange { start, end },
            SpineError::OutOfHorizon { date, start, end } => {
                ValidationError::OutOfHorizon { date, start, end }
            }
        }
    }
}

/// A [`StructuredQuery`] that passed every validator check.
///
/// Only [`QueryValidator::validate`] constructs this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    query: StructuredQuery,
}

impl ValidatedQuery {
    pub fn query(&self) -> &StructuredQuery {
        &self.query
    }

    pub fn into_inner(self) -> StructuredQuery {
        self.query
    }
}

pub struct QueryValidator<'a> {
    catalog: &'a Catalog,
    spine: &'a DateSpine,
}

impl<'a> QueryValidator<'a> {
    pub fn new(catalog: &'a Catalog, spine: &'a DateSpine) -> Self {
        QueryValidator { catalog, spine }
    }

    /// Checks run in a fixed order and stop at the first failure.
    pub fn validate(&self, candidate: StructuredQuery) -> Result<ValidatedQuery, ValidationError> {
        let StructuredQuery {
            metric_name,
            dimensions,
            filters,
            granularity,
            start_date,
            end_date,
        } = candidate;

        let metric = self
            .catalog
            .get_metric(&metric_name)
            .map_err(|_| ValidationError::UnknownMetric(metric_name.clone()))?;

        let not_allowed = |dimension: &str| ValidationError::DimensionNotAllowed {
            dimension: dimension.to_string(),
            metric: metric.name.clone(),
        };

        if let Some(dimension) = dimensions.iter().find(|d| !metric.allows_dimension(d)) {
            return Err(not_allowed(dimension));
        }

        let mut checked_filters = std::collections::BTreeMap::new();
        for (key, FilterValues(values)) in filters {
            if !metric.allows_dimension(&key) {
                return Err(not_allowed(&key));
            }
            if values.is_empty() {
                return Err(ValidationError::EmptyFilter(key));
            }
            let definition = self
                .catalog
                .get_dimension(&key)
                .map_err(|_| not_allowed(&key))?;
            let mut unique: Vec<String> = Vec::with_capacity(values.len());
            for value in values {
                if !definition.accepts_value(&value) {
                    return Err(ValidationError::InvalidFilterValue {
                        dimension: key,
                        value,
                    });
                }
                if !unique.contains(&value) {
                    unique.push(value);
                }
            }
            checked_filters.insert(key, FilterValues(unique));
        }

        if start_date > end_date {
            return Err(ValidationError::InvalidRange {
                start: start_date,
                end: end_date,
            });
        }
        self.spine.check_horizon(start_date)?;
        self.spine.check_horizon(end_date)?;

        let mut unique_dimensions: Vec<String> = Vec::with_capacity(dimensions.len());
        for dimension in dimensions {
            if !unique_dimensions.contains(&dimension) {
                unique_dimensions.push(dimension);
            }
        }

        let query = StructuredQuery {
            metric_name: metric.name.clone(),
            dimensions: unique_dimensions,
            filters: checked_filters,
            granularity,
            start_date,
            end_date,
        };
        debug!("Validated query: {:?}", query);
        Ok(ValidatedQuery { query })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::query::{QueryBuilder, TimeGrain};
    use crate::semantic_model::local_store::LocalSemanticModelStore;
    use rstest::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[fixture]
    #[once]
    fn catalog() -> Catalog {
        Catalog::new(LocalSemanticModelStore::new().semantic_model()).unwrap()
    }

    #[fixture]
    #[once]
    fn spine() -> DateSpine {
        DateSpine::new(date("2020-01-01"), date("2030-12-31")).unwrap()
    }

    fn query_for(metric: &str) -> QueryBuilder {
        StructuredQuery::builder(metric)
    }

    fn in_range(builder: QueryBuilder) -> StructuredQuery {
        builder.range(date("2026-10-11"), date("2026-10-17"))
    }

    #[rstest]
    fn test_valid_query_passes(catalog: &Catalog, spine: &DateSpine) {
        let query = in_range(
            query_for("revenue")
                .dimension("city")
                .filter("payment_method_name", "ETC")
                .granularity(TimeGrain::Week),
        );
        let validated = QueryValidator::new(catalog, spine)
            .validate(query.clone())
            .unwrap();
        assert_eq!(validated.query(), &query);
    }

    #[rstest]
    #[case::unknown_metric(
        in_range(query_for("gross_margin")),
        ValidationError::UnknownMetric("gross_margin".to_string())
    )]
    #[case::unknown_dimension(
        in_range(query_for("revenue").dimension("nonexistent_dim")),
        ValidationError::DimensionNotAllowed {
            dimension: "nonexistent_dim".to_string(),
            metric: "revenue".to_string(),
        }
    )]
    #[case::dimension_not_allowed_for_metric(
        in_range(query_for("avg_transaction_amount").dimension("station_name")),
        ValidationError::DimensionNotAllowed {
            dimension: "station_name".to_string(),
            metric: "avg_transaction_amount".to_string(),
        }
    )]
    #[case::filter_key_not_allowed(
        in_range(query_for("discount_rate").filter("vehicle_type_name", "客车")),
        ValidationError::DimensionNotAllowed {
            dimension: "vehicle_type_name".to_string(),
            metric: "discount_rate".to_string(),
        }
    )]
    #[case::empty_filter(
        in_range(query_for("revenue").filter("city", Vec::<&str>::new())),
        ValidationError::EmptyFilter("city".to_string())
    )]
    #[case::value_outside_closed_set(
        in_range(query_for("revenue").filter("city", "Atlantis")),
        ValidationError::InvalidFilterValue {
            dimension: "city".to_string(),
            value: "Atlantis".to_string(),
        }
    )]
    #[case::inverted_range(
        query_for("revenue").range(date("2026-10-17"), date("2026-10-11")),
        ValidationError::InvalidRange { start: date("2026-10-17"), end: date("2026-10-11") }
    )]
    #[case::before_horizon(
        query_for("revenue").range(date("2019-12-25"), date("2020-01-05")),
        ValidationError::OutOfHorizon {
            date: date("2019-12-25"),
            start: date("2020-01-01"),
            end: date("2030-12-31"),
        }
    )]
    #[case::after_horizon(
        query_for("revenue").range(date("2030-12-25"), date("2031-01-05")),
        ValidationError::OutOfHorizon {
            date: date("2031-01-05"),
            start: date("2020-01-01"),
            end: date("2030-12-31"),
        }
    )]
    fn test_rejections(
        catalog: &Catalog,
        spine: &DateSpine,
        #[case] query: StructuredQuery,
        #[case] expected: ValidationError,
    ) {
        assert_eq!(
            QueryValidator::new(catalog, spine).validate(query).unwrap_err(),
            expected
        );
    }

    #[rstest]
    fn test_dimension_checked_before_range(catalog: &Catalog, spine: &DateSpine) {
        let query = query_for("revenue")
            .dimension("nonexistent_dim")
            .range(date("2026-10-17"), date("2026-10-11"));
        assert!(matches!(
            QueryValidator::new(catalog, spine).validate(query),
            Err(ValidationError::DimensionNotAllowed { .. })
        ));
    }

    #[rstest]
    fn test_deduplicates_dimensions_and_filter_values(catalog: &Catalog, spine: &DateSpine) {
        let query = in_range(
            query_for("revenue")
                .dimensions(["station_name", "city", "station_name"])
                .filter("city", vec!["北京", "上海", "北京"]),
        );
        let validated = QueryValidator::new(catalog, spine).validate(query).unwrap();
        assert_eq!(validated.query().dimensions, vec!["station_name", "city"]);
        assert_eq!(validated.query().filters["city"].0, vec!["北京", "上海"]);
    }

    #[rstest]
    fn test_open_dimension_accepts_any_value(catalog: &Catalog, spine: &DateSpine) {
        let query = in_range(query_for("revenue").filter("station_name", "O'Brien Gate"));
        assert!(QueryValidator::new(catalog, spine).validate(query).is_ok());
    }

    #[rstest]
    fn test_validate_is_idempotent(catalog: &Catalog, spine: &DateSpine) {
        let validator = QueryValidator::new(catalog, spine);
        let query = in_range(query_for("transactions").dimensions(["city", "city"]));
        let once = validator.validate(query).unwrap();
        let twice = validator.validate(once.query().clone()).unwrap();
        assert_eq!(once, twice);
    }
}
