use crate::config::PostgresConfig;
use crate::data_store::{DataStoreClient, DataStoreError, DataStoreMapping, Row, Value};
use async_trait::async_trait;
use log::{debug, error};
use sqlparser::dialect::PostgreSqlDialect;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls};

pub struct PostgresDataStore {
    client: Client,
}

pub struct PostgresMapping;

impl PostgresDataStore {
    pub async fn new(config: PostgresConfig) -> Result<Self, DataStoreError> {
        let connection_string = format!(
            "postgres://{}:{}@{}/{}",
            config.user, config.password, config.host, config.dbname
        );

        let (client, connection) = tokio_postgres::connect(&connection_string, NoTls)
            .await
            .map_err(|e| DataStoreError::ConnectionError(e.to_string()))?;

        // Drives the socket; ends when the client is dropped.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Postgres connection error: {}", e);
            }
        });

        debug!("Connected to postgres at {}/{}", config.host, config.dbname);
        Ok(PostgresDataStore { client })
    }
}

impl DataStoreMapping for PostgresMapping {
    fn get_dialect(&self) -> &dyn sqlparser::dialect::Dialect {
        &PostgreSqlDialect {}
    }
}

#[async_trait]
impl DataStoreClient for PostgresDataStore {
    type Mapping = PostgresMapping;

    fn get_mapping() -> Self::Mapping {
        PostgresMapping {}
    }

    async fn execute(&self, sql: &str) -> Result<Vec<Row>, DataStoreError> {
        let rows = self
            .client
            .query(sql, &[])
            .await
            .map_err(|e| DataStoreError::QueryError(e.to_string()))?;

        rows.iter().map(decode_row).collect()
    }
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row, DataStoreError> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(decode_value(row, idx, column.name(), column.type_())?);
    }
    Ok(Row { columns, values })
}

fn decode_value(
    row: &tokio_postgres::Row,
    idx: usize,
    name: &str,
    pg_type: &Type,
) -> Result<Value, DataStoreError> {
    let query_error = |e: tokio_postgres::Error| DataStoreError::QueryError(e.to_string());
    let value = match pg_type {
        &Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map_err(query_error)?
            .map(|v| Value::Int(v as i64)),
        &Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map_err(query_error)?
            .map(|v| Value::Int(v as i64)),
        &Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .map_err(query_error)?
            .map(Value::Int),
        &Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(query_error)?
            .map(|v| Value::Float(v as f64)),
        &Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .map_err(query_error)?
            .map(Value::Float),
        &Type::NUMERIC => row
            .try_get::<_, Option<rust_decimal::Decimal>>(idx)
            .map_err(query_error)?
            .map(Value::Decimal),
        &Type::TEXT | &Type::VARCHAR | &Type::BPCHAR | &Type::NAME => row
            .try_get::<_, Option<String>>(idx)
            .map_err(query_error)?
            .map(Value::String),
        &Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .map_err(query_error)?
            .map(Value::Boolean),
        &Type::DATE => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .map_err(query_error)?
            .map(Value::Date),
        other => {
            error!("Unexpected type {} in column {}", other, name);
            return Err(DataStoreError::UnsupportedType {
                column: name.to_string(),
                type_name: other.to_string(),
            });
        }
    };
    Ok(value.unwrap_or(Value::Null))
}
