mod postgres;

pub use postgres::{PostgresDataStore, PostgresMapping};

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Warehouse specific behaviour the compiled SQL is checked against.
pub trait DataStoreMapping {
    /// Dialect supported by the data store
    fn get_dialect(&self) -> &dyn sqlparser::dialect::Dialect;
}

/// Executes compiled SQL and returns the rows.
///
/// The only external collaborator of the query pipeline: it receives
/// statements that already passed validation and the read-only check.
#[async_trait]
pub trait DataStoreClient: Send + Sync {
    type Mapping: DataStoreMapping;

    fn get_mapping() -> Self::Mapping;

    async fn execute(&self, sql: &str) -> Result<Vec<Row>, DataStoreError>;
}

/// One result record; columns keep the order of the SELECT list.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }
}

impl Serialize for Row {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    Date(NaiveDate),
}

#[derive(Error, Debug)]
pub enum DataStoreError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Unsupported column type {type_name} for column {column}")]
    UnsupportedType { column: String, type_name: String },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_row_serializes_in_column_order() {
        let row = Row {
            columns: vec!["date_day".to_string(), "city".to_string(), "revenue".to_string()],
            values: vec![
                Value::Date(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()),
                Value::String("北京".to_string()),
                Value::Decimal(Decimal::new(12550, 2)),
            ],
        };
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"{"date_day":"2026-10-17","city":"北京","revenue":125.5}"#
        );
        assert_eq!(row.get("city"), Some(&Value::String("北京".to_string())));
        assert_eq!(row.get("station_name"), None);
    }

    #[test]
    fn test_get_on_short_row() {
        let row = Row {
            columns: vec!["date_day".to_string(), "revenue".to_string()],
            values: vec![Value::Null],
        };
        assert_eq!(row.get("date_day"), Some(&Value::Null));
        assert_eq!(row.get("revenue"), None);
    }

    #[test]
    fn test_null_serializes_as_json_null() {
        let row = Row {
            columns: vec!["discount_rate".to_string()],
            values: vec![Value::Null],
        };
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"discount_rate":null}"#);
    }
}
