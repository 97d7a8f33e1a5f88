use crate::config::{LlmConfig, SpineConfig};
use crate::data_store::{DataStoreClient, DataStoreError, DataStoreMapping, Row};
use crate::date_spine::DateSpine;
use crate::query::{QueryValidator, StructuredQuery, ValidatedQuery, ValidationError};
use crate::semantic_model::{Catalog, MetricSummary};
use crate::sql_compiler::{check_read_only, CompileError, SqlCompiler};
use crate::translator::{TranslationError, Translator};
use chrono::NaiveDate;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Execution error: {0}")]
    Execution(#[from] DataStoreError),
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(err) => err.kind(),
            ServiceError::Translation(err) => err.kind(),
            ServiceError::Compile(CompileError::UnsafeStatement(_)) => "UnsafeStatement",
            ServiceError::Compile(_) => "CompileError",
            ServiceError::Execution(_) => "ExecutionError",
        }
    }
}

/// Error body returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl From<&ServiceError> for ErrorResponse {
    fn from(err: &ServiceError) -> Self {
        ErrorResponse {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NaturalLanguageRequest {
    pub query: String,
    #[serde(default)]
    pub provider_id: Option<String>,
}

/// Rows of one executed statement together with the statement itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub sql_text: String,
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricQueryResponse {
    pub metric_name: String,
    pub data: Vec<Row>,
    pub query_sql: String,
    pub row_count: usize,
}

impl MetricQueryResponse {
    fn new(metric_name: String, result: QueryResult) -> Self {
        MetricQueryResponse {
            metric_name,
            data: result.rows,
            query_sql: result.sql_text,
            row_count: result.row_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NaturalLanguageResponse {
    #[serde(flatten)]
    pub result: MetricQueryResponse,
    pub parsed_query: StructuredQuery,
    pub original_query: String,
}

/// Entry point for both the form and the chat path.
///
/// Each request runs validation, compilation and execution in that order;
/// the executor only ever sees SQL compiled from a [`ValidatedQuery`].
pub struct MetricsService<D> {
    catalog: Arc<Catalog>,
    spine: Arc<DateSpine>,
    compiler: SqlCompiler,
    translator: Translator,
    data_store: D,
}

impl<D> MetricsService<D>
where
    D: DataStoreClient,
{
    pub fn new(
        catalog: Arc<Catalog>,
        spine: Arc<DateSpine>,
        compiler: SqlCompiler,
        translator: Translator,
        data_store: D,
    ) -> Self {
        MetricsService {
            catalog,
            spine,
            compiler,
            translator,
            data_store,
        }
    }

    /// Builds the spine, compiler and translator around a loaded catalog.
    pub fn from_config(
        catalog: Catalog,
        spine_config: &SpineConfig,
        llm_config: &LlmConfig,
        data_store: D,
    ) -> Result<Self, CompileError> {
        let catalog = Arc::new(catalog);
        let spine = Arc::new(DateSpine::new(spine_config.start, spine_config.end)?);
        info!(
            "Date spine covers {} to {} ({} days)",
            spine_config.start,
            spine_config.end,
            spine.len()
        );

        let mut compiler = SqlCompiler::new(catalog.clone(), spine.clone());
        if let Some(table) = &spine_config.table {
            info!("Using materialized date spine {}", table);
            compiler = compiler.with_spine_table(table)?;
        }
        let translator = Translator::from_config(catalog.clone(), spine.clone(), llm_config);
        info!("Translation providers: {:?}", translator.provider_ids());

        Ok(MetricsService::new(
            catalog, spine, compiler, translator, data_store,
        ))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn list_metrics(&self) -> Vec<MetricSummary> {
        self.catalog.summaries()
    }

    pub async fn query(&self, request: StructuredQuery) -> Result<MetricQueryResponse, ServiceError> {
        debug!("Form request: {:?}", request);
        let validated = QueryValidator::new(&self.catalog, &self.spine).validate(request)?;
        let result = self.execute(&validated).await?;
        Ok(MetricQueryResponse::new(
            validated.into_inner().metric_name,
            result,
        ))
    }

    pub async fn query_natural(
        &self,
        request: NaturalLanguageRequest,
        today: NaiveDate,
    ) -> Result<NaturalLanguageResponse, ServiceError> {
        debug!("Natural language request: {:?}", request);
        let validated = self
            .translator
            .translate(&request.query, request.provider_id.as_deref(), today)
            .await?;
        let result = self.execute(&validated).await?;
        let parsed_query = validated.into_inner();
        Ok(NaturalLanguageResponse {
            result: MetricQueryResponse::new(parsed_query.metric_name.clone(), result),
            parsed_query,
            original_query: request.query,
        })
    }

    async fn execute(&self, validated: &ValidatedQuery) -> Result<QueryResult, ServiceError> {
        let sql = self.compiler.compile(validated)?;
        check_read_only(&sql, D::get_mapping().get_dialect())?;

        let rows = self.data_store.execute(&sql).await.map_err(|e| {
            error!("Failed to execute query for {}: {}", validated.query().metric_name, e);
            e
        })?;
        debug!("Query returned {} rows", rows.len());

        Ok(QueryResult {
            row_count: rows.len(),
            rows,
            sql_text: sql,
        })
    }
}
