//! Renders a [`ValidatedQuery`] into a single read-only SELECT statement.
//!
//! Every identifier in the output comes from the [`Catalog`]; the only
//! request text that reaches the SQL is filter values, rendered as
//! single-quoted literals with quotes doubled.
//!
//! The statement is built from four parts:
//!
//! ```text
//! WITH spine (...) AS (...)          one row per day in [start, end]
//!    , facts AS (...)                fact rows in range, joins + filters applied
//!    , grid AS (...)                 spine x observed dimension combinations,
//!                                    or one all-NULL combination if none
//! SELECT ... FROM grid LEFT JOIN facts ... GROUP BY ... ORDER BY ...
//! ```

use crate::date_spine::{DateSpine, DateSpineRow, SpineError};
use crate::query::ValidatedQuery;
use crate::semantic_model::{is_identifier, Aggregation, Catalog, CatalogError, DimensionJoin};
use chrono::NaiveDate;
use log::debug;
use sqlparser::ast::{Ident, ObjectName, Query, SetExpr, Statement, Value};
use sqlparser::dialect::Dialect;
use sqlparser::parser::Parser;
use std::sync::Arc;
use thiserror::Error;

const SPINE_COLUMNS: [&str; 5] = [
    "date_day",
    "date_week",
    "date_month",
    "date_quarter",
    "date_year",
];
const FACT_ALIAS: &str = "f";
const METRIC_INPUT: &str = "metric_input";
const METRIC_DENOMINATOR: &str = "metric_denominator";

#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Spine(#[from] SpineError),

    #[error("Invalid spine table name: {0:?}")]
    InvalidSpineTable(String),

    #[error("SQL parsing error: {0}")]
    SqlParseError(String),

    #[error("Only a single read-only query is allowed: {0}")]
    UnsafeStatement(String),
}

/// Where the `spine` CTE reads its rows from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpineSource {
    /// Rows are rendered as a `VALUES` list from the in-memory spine.
    Inline,
    /// A materialized table carrying the five spine columns.
    Table(String),
}

pub struct SqlCompiler {
    catalog: Arc<Catalog>,
    spine: Arc<DateSpine>,
    spine_source: SpineSource,
}

impl SqlCompiler {
    pub fn new(catalog: Arc<Catalog>, spine: Arc<DateSpine>) -> Self {
        SqlCompiler {
            catalog,
            spine,
            spine_source: SpineSource::Inline,
        }
    }

    pub fn with_spine_table(mut self, table: &str) -> Result<Self, CompileError> {
        if !table.split('.').all(is_identifier) {
            return Err(CompileError::InvalidSpineTable(table.to_string()));
        }
        self.spine_source = SpineSource::Table(table.to_string());
        Ok(self)
    }

    pub fn spine_source(&self) -> &SpineSource {
        &self.spine_source
    }

    pub fn compile(&self, validated: &ValidatedQuery) -> Result<String, CompileError> {
        let query = validated.query();
        let metric = self.catalog.get_metric(&query.metric_name)?;
        let fact = self.catalog.fact();

        // Dimensions referenced anywhere: selected ones first, then filter-only ones.
        let mut referenced: Vec<&str> = query.dimensions.iter().map(String::as_str).collect();
        for key in query.filters.keys() {
            if !referenced.contains(&key.as_str()) {
                referenced.push(key);
            }
        }

        let mut joins: Vec<(&DimensionJoin, String)> = Vec::new();
        let mut columns: Vec<(&str, String)> = Vec::with_capacity(referenced.len());
        for name in referenced {
            let dimension = self.catalog.get_dimension(name)?;
            let table_alias = match &dimension.join {
                None => FACT_ALIAS.to_string(),
                Some(join) => match joins.iter().find(|(existing, _)| *existing == join) {
                    Some((_, alias)) => alias.clone(),
                    None => {
                        let alias = format!("j{}", joins.len() + 1);
                        joins.push((join, alias.clone()));
                        alias
                    }
                },
            };
            columns.push((name, format!("{}.{}", table_alias, quote(&dimension.source_column))));
        }
        let column_of = |name: &str| {
            columns
                .iter()
                .find(|(dimension, _)| *dimension == name)
                .map(|(_, column)| column.as_str())
                .unwrap_or_default()
        };

        let fact_date = format!("CAST({}.{} AS DATE)", FACT_ALIAS, quote(&fact.date_column));

        // spine
        let spine_cte = format!(
            "spine ({}) AS ({})",
            SPINE_COLUMNS.join(", "),
            self.render_spine(query.start_date, query.end_date)?
        );

        // facts
        let mut fact_projection = vec![
            format!("{} AS date_day", fact_date),
            format!(
                "{}.{} AS {}",
                FACT_ALIAS,
                quote(&metric.source_column),
                METRIC_INPUT
            ),
        ];
        if let (Aggregation::Ratio, Some(denominator)) =
            (metric.aggregation, &metric.denominator_column)
        {
            fact_projection.push(format!(
                "{}.{} AS {}",
                FACT_ALIAS,
                quote(denominator),
                METRIC_DENOMINATOR
            ));
        }
        for dimension in &query.dimensions {
            fact_projection.push(format!("{} AS {}", column_of(dimension), quote(dimension)));
        }

        let mut fact_from = format!("{} AS {}", table(&fact.table), FACT_ALIAS);
        for (join, alias) in &joins {
            fact_from.push_str(&format!(
                " LEFT JOIN {} AS {} ON {}.{} = {}.{}",
                table(&join.table),
                alias,
                FACT_ALIAS,
                quote(&join.foreign_key),
                alias,
                quote(&join.primary_key)
            ));
        }

        let mut predicates = vec![format!(
            "{} BETWEEN {} AND {}",
            fact_date,
            date_literal(query.start_date),
            date_literal(query.end_date)
        )];
        for (dimension, values) in &query.filters {
            let column = column_of(dimension);
            match values.0.as_slice() {
                [single] => predicates.push(format!("{} = {}", column, string_literal(single))),
                many => predicates.push(format!(
                    "{} IN ({})",
                    column,
                    many.iter()
                        .map(|v| string_literal(v))
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            }
        }

        let facts_cte = format!(
            "facts AS (SELECT {} FROM {} WHERE {})",
            fact_projection.join(", "),
            fact_from,
            predicates.join(" AND ")
        );

        // grid
        let spine_projection = SPINE_COLUMNS
            .iter()
            .map(|c| format!("spine.{}", c))
            .collect::<Vec<_>>();
        let grid_cte = if query.dimensions.is_empty() {
            format!("grid AS (SELECT {} FROM spine)", spine_projection.join(", "))
        } else {
            let dims: Vec<String> = query.dimensions.iter().map(|d| quote(d)).collect();
            let dims_projection: Vec<String> =
                dims.iter().map(|d| format!("dims.{}", d)).collect();
            let null_dims: Vec<String> = dims.iter().map(|d| format!("NULL AS {}", d)).collect();
            // An all-NULL combination stands in when the range has no facts,
            // so every spine date still yields a row.
            format!(
                "grid AS (SELECT {}, {} FROM spine CROSS JOIN (SELECT DISTINCT {} FROM facts UNION ALL SELECT {} WHERE NOT EXISTS (SELECT 1 FROM facts)) AS dims)",
                spine_projection.join(", "),
                dims_projection.join(", "),
                dims.join(", "),
                null_dims.join(", ")
            )
        };

        // final select
        let grain = format!("grid.{}", query.granularity.spine_column());
        let mut group_by = vec![grain.clone()];
        let mut on = vec!["facts.date_day = grid.date_day".to_string()];
        for dimension in &query.dimensions {
            let quoted = quote(dimension);
            group_by.push(format!("grid.{}", quoted));
            on.push(format!(
                "facts.{} IS NOT DISTINCT FROM grid.{}",
                quoted, quoted
            ));
        }
        let aggregate = metric.render_aggregate(
            &format!("facts.{}", METRIC_INPUT),
            &format!("facts.{}", METRIC_DENOMINATOR),
        );

        let sql = format!(
            "WITH {}, {}, {} SELECT {}, {} AS {} FROM grid LEFT JOIN facts ON {} GROUP BY {} ORDER BY {}",
            spine_cte,
            facts_cte,
            grid_cte,
            group_by.join(", "),
            aggregate,
            quote(&metric.name),
            on.join(" AND "),
            group_by.join(", "),
            group_by.join(", ")
        );

        debug!("Compiled SQL: {}", sql);
        Ok(sql)
    }

    fn render_spine(&self, start: NaiveDate, end: NaiveDate) -> Result<String, CompileError> {
        match &self.spine_source {
            SpineSource::Inline => {
                let rows = self.spine.spine_for(start, end)?;
                Ok(format!(
                    "VALUES {}",
                    rows.iter().map(spine_row).collect::<Vec<_>>().join(", ")
                ))
            }
            SpineSource::Table(name) => {
                self.spine.spine_for(start, end)?;
                Ok(format!(
                    "SELECT {} FROM {} WHERE date_day BETWEEN {} AND {}",
                    SPINE_COLUMNS.join(", "),
                    table(name),
                    date_literal(start),
                    date_literal(end)
                ))
            }
        }
    }
}

/// Accepts exactly one statement that cannot modify data.
pub fn check_read_only(sql: &str, dialect: &dyn Dialect) -> Result<(), CompileError> {
    let statements =
        Parser::parse_sql(dialect, sql).map_err(|e| CompileError::SqlParseError(e.to_string()))?;

    match statements.as_slice() {
        [Statement::Query(query)] if is_read_only(query) => Ok(()),
        [Statement::Query(_)] => Err(CompileError::UnsafeStatement(
            "query writes data".to_string(),
        )),
        [other] => Err(CompileError::UnsafeStatement(other.to_string())),
        many => Err(CompileError::UnsafeStatement(format!(
            "{} statements",
            many.len()
        ))),
    }
}

fn is_read_only(query: &Query) -> bool {
    let ctes_read_only = query
        .with
        .as_ref()
        .map(|with| with.cte_tables.iter().all(|cte| is_read_only(&cte.query)))
        .unwrap_or(true);
    ctes_read_only && query.locks.is_empty() && is_read_only_set_expr(&query.body)
}

fn is_read_only_set_expr(expr: &SetExpr) -> bool {
    match expr {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => is_read_only(query),
        SetExpr::SetOperation { left, right, .. } => {
            is_read_only_set_expr(left) && is_read_only_set_expr(right)
        }
        SetExpr::Insert(_) | SetExpr::Update(_) => false,
        _ => true,
    }
}

fn quote(name: &str) -> String {
    Ident::with_quote('"', name).to_string()
}

fn table(name: &str) -> String {
    ObjectName(name.split('.').map(|part| Ident::with_quote('"', part)).collect()).to_string()
}

fn string_literal(value: &str) -> String {
    Value::SingleQuotedString(value.to_string()).to_string()
}

fn date_literal(date: NaiveDate) -> String {
    format!("DATE '{}'", date.format("%Y-%m-%d"))
}

fn spine_row(row: &DateSpineRow) -> String {
    format!(
        "({}, {}, {}, {}, {})",
        date_literal(row.date_day),
        date_literal(row.date_week),
        date_literal(row.date_month),
        date_literal(row.date_quarter),
        date_literal(row.date_year)
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::query::{QueryBuilder, QueryValidator, StructuredQuery, TimeGrain};
    use crate::semantic_model::local_store::LocalSemanticModelStore;
    use regex::Regex;
    use rstest::*;
    use sqlparser::dialect::PostgreSqlDialect;
    use std::collections::HashSet;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[fixture]
    fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::new(LocalSemanticModelStore::new().semantic_model()).unwrap())
    }

    #[fixture]
    fn spine() -> Arc<DateSpine> {
        Arc::new(DateSpine::new(date("2020-01-01"), date("2030-12-31")).unwrap())
    }

    #[fixture]
    fn compiler(catalog: Arc<Catalog>, spine: Arc<DateSpine>) -> SqlCompiler {
        SqlCompiler::new(catalog, spine)
    }

    fn week(builder: QueryBuilder) -> StructuredQuery {
        builder.range(date("2026-10-11"), date("2026-10-17"))
    }

    fn compile(compiler: &SqlCompiler, query: StructuredQuery) -> String {
        let validated = QueryValidator::new(&compiler.catalog, &compiler.spine)
            .validate(query)
            .unwrap();
        let sql = compiler.compile(&validated).unwrap();
        check_read_only(&sql, &PostgreSqlDialect {}).unwrap();
        sql
    }

    fn group_by_terms(sql: &str) -> Vec<String> {
        let start = sql.find(" GROUP BY ").unwrap() + " GROUP BY ".len();
        let end = sql.find(" ORDER BY ").unwrap();
        sql[start..end].split(", ").map(str::to_string).collect()
    }

    #[rstest]
    fn test_compiles_plain_daily_series(compiler: SqlCompiler) {
        let sql = compile(&compiler, week(StructuredQuery::builder("revenue")));

        assert!(sql.starts_with("WITH spine (date_day, date_week, date_month, date_quarter, date_year) AS (VALUES "));
        assert!(sql.contains(r#"FROM "main_dwd"."dwd_toll_transaction" AS f"#));
        assert!(sql.contains(
            r#"CAST(f."transaction_date" AS DATE) BETWEEN DATE '2026-10-11' AND DATE '2026-10-17'"#
        ));
        assert!(sql.contains("grid AS (SELECT spine.date_day, spine.date_week, spine.date_month, spine.date_quarter, spine.date_year FROM spine)"));
        assert!(sql.ends_with(
            r#"SELECT grid.date_day, COALESCE(SUM(facts.metric_input), 0) AS "revenue" FROM grid LEFT JOIN facts ON facts.date_day = grid.date_day GROUP BY grid.date_day ORDER BY grid.date_day"#
        ));
    }

    #[rstest]
    fn test_inline_spine_has_one_row_per_day(compiler: SqlCompiler) {
        let sql = compile(&compiler, week(StructuredQuery::builder("transactions")));
        let spine_part = &sql[..sql.find("facts AS").unwrap()];
        assert_eq!(spine_part.matches("(DATE '").count(), 7);
        assert!(spine_part.contains(
            "(DATE '2026-10-11', DATE '2026-10-05', DATE '2026-10-01', DATE '2026-10-01', DATE '2026-01-01')"
        ));
    }

    #[rstest]
    #[case::no_dimensions(vec![], 1)]
    #[case::one_dimension(vec!["city"], 2)]
    #[case::two_dimensions(vec!["city", "payment_method_name"], 3)]
    #[case::duplicate_dimension(vec!["city", "city"], 2)]
    fn test_one_group_by_term_per_dimension_plus_date(
        compiler: SqlCompiler,
        #[case] dimensions: Vec<&str>,
        #[case] expected: usize,
    ) {
        let sql = compile(
            &compiler,
            week(StructuredQuery::builder("revenue").dimensions(dimensions)),
        );
        let terms = group_by_terms(&sql);
        assert_eq!(terms.len(), expected);
        assert_eq!(terms[0], "grid.date_day");
    }

    #[rstest]
    fn test_dimensions_keep_request_order(compiler: SqlCompiler) {
        let sql = compile(
            &compiler,
            week(StructuredQuery::builder("revenue").dimensions(["payment_method_name", "city"])),
        );
        assert!(sql.ends_with(
            r#"ORDER BY grid.date_day, grid."payment_method_name", grid."city""#
        ));
        assert!(sql.contains(r#"facts."city" IS NOT DISTINCT FROM grid."city""#));
        assert!(sql.contains(r#"CROSS JOIN (SELECT DISTINCT "payment_method_name", "city" FROM facts UNION ALL "#));
    }

    #[rstest]
    fn test_dimension_grid_survives_empty_range(compiler: SqlCompiler) {
        let sql = compile(
            &compiler,
            week(StructuredQuery::builder("revenue").dimensions(["payment_method_name", "city"])),
        );
        assert!(sql.contains(
            r#"UNION ALL SELECT NULL AS "payment_method_name", NULL AS "city" WHERE NOT EXISTS (SELECT 1 FROM facts)) AS dims"#
        ));
        // The fallback only feeds the grid; facts stay untouched.
        assert_eq!(sql.matches("UNION ALL").count(), 1);
    }

    #[rstest]
    fn test_joined_dimensions_share_one_join(compiler: SqlCompiler) {
        let sql = compile(
            &compiler,
            week(StructuredQuery::builder("revenue").dimensions(["city", "station_name"])),
        );
        assert_eq!(sql.matches(r#"LEFT JOIN "main_dim"."dim_toll_station""#).count(), 1);
        assert!(sql.contains(r#"LEFT JOIN "main_dim"."dim_toll_station" AS j1 ON f."station_id" = j1."station_id""#));
        assert!(sql.contains(r#"j1."city" AS "city""#));
        assert!(sql.contains(r#"j1."station_name" AS "station_name""#));
    }

    #[rstest]
    fn test_filter_only_dimension_is_joined_but_not_grouped(compiler: SqlCompiler) {
        let sql = compile(
            &compiler,
            week(StructuredQuery::builder("revenue").filter("city", vec!["北京", "上海"])),
        );
        assert!(sql.contains(r#"j1."city" IN ('北京', '上海')"#));
        assert_eq!(group_by_terms(&sql), vec!["grid.date_day"]);
    }

    #[rstest]
    fn test_filter_values_are_escaped(compiler: SqlCompiler) {
        let sql = compile(
            &compiler,
            week(StructuredQuery::builder("revenue").filter("station_name", "O'Brien'; DROP TABLE x; --")),
        );
        assert!(sql.contains(r#"j1."station_name" = 'O''Brien''; DROP TABLE x; --'"#));
    }

    #[rstest]
    fn test_ratio_guards_division(compiler: SqlCompiler) {
        let sql = compile(&compiler, week(StructuredQuery::builder("discount_rate")));
        assert!(sql.contains(r#"f."toll_amount" AS metric_denominator"#));
        assert!(sql.contains(
            r#"CAST(SUM(facts.metric_input) AS DOUBLE PRECISION) / NULLIF(SUM(facts.metric_denominator), 0) AS "discount_rate""#
        ));
    }

    #[rstest]
    #[case::week(TimeGrain::Week, "grid.date_week")]
    #[case::month(TimeGrain::Month, "grid.date_month")]
    #[case::year(TimeGrain::Year, "grid.date_year")]
    fn test_granularity_selects_spine_column(
        compiler: SqlCompiler,
        #[case] grain: TimeGrain,
        #[case] column: &str,
    ) {
        let sql = compile(
            &compiler,
            week(StructuredQuery::builder("transactions").granularity(grain)),
        );
        assert_eq!(group_by_terms(&sql), vec![column.to_string()]);
        assert!(sql.contains("facts.date_day = grid.date_day"));
    }

    #[rstest]
    fn test_table_spine(compiler: SqlCompiler) {
        let compiler = compiler.with_spine_table("main_dim.dim_date_spine").unwrap();
        let sql = compile(&compiler, week(StructuredQuery::builder("revenue")));
        assert!(sql.contains(
            r#"spine (date_day, date_week, date_month, date_quarter, date_year) AS (SELECT date_day, date_week, date_month, date_quarter, date_year FROM "main_dim"."dim_date_spine" WHERE date_day BETWEEN DATE '2026-10-11' AND DATE '2026-10-17')"#
        ));
        assert!(!sql.contains("VALUES"));
    }

    #[rstest]
    fn test_rejects_bad_spine_table(compiler: SqlCompiler) {
        assert!(matches!(
            compiler.with_spine_table("dates; DROP TABLE x"),
            Err(CompileError::InvalidSpineTable(_))
        ));
    }

    #[rstest]
    fn test_references_only_catalog_identifiers(compiler: SqlCompiler, catalog: Arc<Catalog>) {
        let sql = compile(
            &compiler,
            week(
                StructuredQuery::builder("discount_rate")
                    .dimensions(["city", "payment_method_name"])
                    .filter("station_name", "济南东"),
            ),
        );

        let mut known: HashSet<String> = HashSet::new();
        let fact = catalog.fact();
        known.extend(fact.table.split('.').map(str::to_string));
        known.insert(fact.date_column.clone());
        for metric in catalog.list_metrics() {
            known.insert(metric.name.clone());
            known.insert(metric.source_column.clone());
            known.extend(metric.denominator_column.clone());
        }
        for dimension in catalog.list_dimensions() {
            known.insert(dimension.name.clone());
            known.insert(dimension.source_column.clone());
            if let Some(join) = &dimension.join {
                known.extend(join.table.split('.').map(str::to_string));
                known.insert(join.foreign_key.clone());
                known.insert(join.primary_key.clone());
            }
        }

        let quoted = Regex::new(r#""([^"]+)""#).unwrap();
        for capture in quoted.captures_iter(&sql) {
            assert!(known.contains(&capture[1]), "unexpected identifier {}", &capture[1]);
        }
    }

    #[rstest]
    #[case::select("SELECT 1", true)]
    #[case::cte("WITH a AS (SELECT 1 AS x) SELECT x FROM a", true)]
    #[case::delete("DELETE FROM facts", false)]
    #[case::drop("DROP TABLE facts", false)]
    #[case::stacked("SELECT 1; DROP TABLE facts", false)]
    #[case::select_into("SELECT * INTO copy FROM facts", false)]
    #[case::for_update("SELECT * FROM facts FOR UPDATE", false)]
    #[case::garbage("SELEC 1", false)]
    fn test_check_read_only(#[case] sql: &str, #[case] allowed: bool) {
        assert_eq!(check_read_only(sql, &PostgreSqlDialect {}).is_ok(), allowed);
    }
}
