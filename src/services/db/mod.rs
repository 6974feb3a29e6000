// Database handler module
// Purpose: Provide a unified capability set over heterogeneous source engines
// Design: Static trait with per-engine concrete types, factory dispatch

mod bigquery;
mod duckdb;
mod mysql;
mod oracle;
mod postgres;
mod sampling;
mod sqlite;

pub use bigquery::BigQueryHandler;
pub use duckdb::DuckDbHandler;
pub use mysql::MySqlHandler;
pub use oracle::OracleHandler;
pub use postgres::PostgresHandler;
pub use sqlite::SqliteHandler;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::SamplingConfig;
use crate::models::connection::{ConnectionSpec, DatabaseEngine};
use crate::models::metadata::{
    Constraints, IndexInfo, PartitionInfo, SampleRow, TableSample, TableSchema,
};
use crate::utils::{ApiError, ApiResult, ensure_safe_identifier};

/// Value bound into a query. Values are never interpolated into SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl SqlValue {
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

/// Outcome of a pre-execution cost check
#[derive(Debug, Clone)]
pub struct CostCheck {
    pub safe: bool,
    pub rationale: String,
    pub estimated_bytes: Option<i64>,
}

impl CostCheck {
    /// For engines without dry-run support
    pub fn unchecked() -> Self {
        Self { safe: true, rationale: "unchecked".to_string(), estimated_bytes: None }
    }
}

/// Sampling knobs handed to a handler
#[derive(Debug, Clone, Copy)]
pub struct SampleSpec {
    pub sample_size: usize,
    pub num_samples: usize,
    /// Partition-aware engines only
    pub max_partitions: usize,
}

/// Native placeholder style of an engine. Canonical SQL uses `:name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// Postgres `$1`, `$2`, ...
    Numbered,
    /// `?` positional (MySQL, SQLite, DuckDB)
    Question,
    /// BigQuery `@name`
    AtNamed,
    /// Oracle keeps `:name`
    ColonNamed,
}

/// Uniform capability set every engine adapter implements
#[async_trait]
pub trait DatabaseHandler: Send + Sync {
    fn engine(&self) -> DatabaseEngine;

    /// Quote a qualified table reference for generated SQL
    fn table_ref(&self, schema: &str, table: &str) -> String {
        format!("\"{}\".\"{}\"", schema, table)
    }

    /// Quote a column identifier for generated SQL
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident)
    }

    /// Engine pagination clause appended after the WHERE part
    fn limit_clause(&self, limit: usize, offset: usize) -> String {
        if offset == 0 {
            format!("LIMIT {}", limit)
        } else {
            format!("LIMIT {} OFFSET {}", limit, offset)
        }
    }

    /// Cheap liveness probe (`SELECT 1` or equivalent)
    async fn ping(&self) -> ApiResult<()>;

    async fn list_schemas(&self) -> ApiResult<Vec<String>>;

    async fn list_tables(&self, schema: &str) -> ApiResult<Vec<String>>;

    /// Declared column types, nullability, precision and engine comments
    async fn table_schema(&self, schema: &str, table: &str) -> ApiResult<TableSchema>;

    async fn table_indexes(&self, schema: &str, table: &str) -> ApiResult<Vec<IndexInfo>>;

    async fn table_constraints(&self, schema: &str, table: &str) -> ApiResult<Constraints>;

    /// Row count; engine statistics when `estimate`, exact count otherwise.
    /// `None` when the engine cannot answer.
    async fn row_count(&self, schema: &str, table: &str, estimate: bool) -> ApiResult<Option<i64>>;

    /// Native partitioning facts; engines without partitioning return None
    async fn partition_info(&self, _schema: &str, _table: &str) -> ApiResult<Option<PartitionInfo>> {
        Ok(None)
    }

    /// Dry-run cost estimation for a query and its bound parameters;
    /// engines without it answer "unchecked"
    async fn check_cost(&self, _sql: &str, _params: &[(&str, SqlValue)]) -> ApiResult<CostCheck> {
        Ok(CostCheck::unchecked())
    }

    /// Run a read-only query. `sql` uses canonical `:name` placeholders; the
    /// handler translates them to its native style and binds `params`.
    async fn fetch_all(&self, sql: &str, params: &[(&str, SqlValue)]) -> ApiResult<Vec<SampleRow>>;

    /// Draw a representative sample. The default walks the shared strategy
    /// ladder (full / stratified / random-offset); partitioned engines
    /// override this with partition pruning.
    async fn sample(&self, schema: &str, table: &str, spec: &SampleSpec) -> ApiResult<TableSample> {
        sampling::standard_sample(self, schema, table, spec).await
    }
}

impl std::fmt::Debug for dyn DatabaseHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.engine())
    }
}

/// String view of a JSON row field (numbers and bools stringified)
pub(crate) fn row_str(row: &SampleRow, key: &str) -> Option<String> {
    match row.get(key) {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

/// Integer view of a JSON row field (numeric strings accepted)
pub(crate) fn row_i64(row: &SampleRow, key: &str) -> Option<i64> {
    match row.get(key)? {
        serde_json::Value::Number(n) => {
            n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))
        }
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Validate every identifier that is about to reach generated SQL
pub fn check_identifiers<'a, I>(idents: I) -> ApiResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    for ident in idents {
        ensure_safe_identifier(ident)?;
    }
    Ok(())
}

/// Translate canonical `:name` placeholders into the engine's native style.
///
/// Returns the rewritten SQL plus the bound values in placeholder order
/// (named styles keep their names). `::` type casts are left untouched.
pub fn translate_placeholders(
    sql: &str,
    params: &[(&str, SqlValue)],
    style: ParamStyle,
) -> ApiResult<(String, Vec<(String, SqlValue)>)> {
    let mut out = String::with_capacity(sql.len());
    let mut ordered: Vec<(String, SqlValue)> = Vec::new();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == ':' {
            // skip '::' casts
            if chars.get(i + 1) == Some(&':') {
                out.push_str("::");
                i += 2;
                continue;
            }
            // placeholder start?
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                end += 1;
            }
            let starts_ident =
                end > start && (chars[start].is_ascii_alphabetic() || chars[start] == '_');
            if starts_ident {
                let name: String = chars[start..end].iter().collect();
                let value = params
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| {
                        ApiError::internal_error(format!("Missing bind parameter :{}", name))
                    })?;
                ordered.push((name.clone(), value));
                match style {
                    ParamStyle::Numbered => out.push_str(&format!("${}", ordered.len())),
                    ParamStyle::Question => out.push('?'),
                    ParamStyle::AtNamed => out.push_str(&format!("@{}", name)),
                    ParamStyle::ColonNamed => out.push_str(&format!(":{}", name)),
                }
                i = end;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }

    Ok((out, ordered))
}

/// Build a handler for a resolved connection spec.
///
/// `secret` is the resolved credential (password or bearer token); the
/// registry resolves it before calling here.
pub async fn create_handler(
    spec: &ConnectionSpec,
    secret: Option<String>,
    sampling: &SamplingConfig,
) -> ApiResult<Arc<dyn DatabaseHandler>> {
    let handler: Arc<dyn DatabaseHandler> = match spec.engine {
        DatabaseEngine::Postgres => Arc::new(PostgresHandler::connect(spec, secret).await?),
        DatabaseEngine::Mysql => Arc::new(MySqlHandler::connect(spec, secret).await?),
        DatabaseEngine::Sqlite => Arc::new(SqliteHandler::connect(spec).await?),
        DatabaseEngine::Duckdb => Arc::new(DuckDbHandler::connect(spec).await?),
        DatabaseEngine::Oracle => Arc::new(OracleHandler::connect(spec, secret).await?),
        DatabaseEngine::Bigquery => {
            Arc::new(BigQueryHandler::new(spec, secret, sampling.max_scan_bytes)?)
        }
    };
    Ok(handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_to_numbered_style() {
        let params = [
            ("schema", SqlValue::Text("public".into())),
            ("table", SqlValue::Text("users".into())),
        ];
        let (sql, ordered) = translate_placeholders(
            "SELECT 1 FROM information_schema.tables WHERE table_schema = :schema AND table_name = :table",
            &params,
            ParamStyle::Numbered,
        )
        .unwrap();
        assert!(sql.ends_with("table_schema = $1 AND table_name = $2"));
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].0, "schema");
    }

    #[test]
    fn leaves_type_casts_alone() {
        let (sql, ordered) = translate_placeholders(
            "SELECT reltuples::bigint FROM pg_class WHERE relname = :name",
            &[("name", SqlValue::Text("t".into()))],
            ParamStyle::Numbered,
        )
        .unwrap();
        assert_eq!(sql, "SELECT reltuples::bigint FROM pg_class WHERE relname = $1");
        assert_eq!(ordered.len(), 1);
    }

    #[test]
    fn repeats_values_for_reused_names() {
        let (sql, ordered) = translate_placeholders(
            "SELECT * FROM t WHERE a = :v OR b = :v",
            &[("v", SqlValue::Int(7))],
            ParamStyle::Question,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = ? OR b = ?");
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn named_styles_keep_names() {
        let (sql, _) = translate_placeholders(
            "SELECT * FROM t WHERE part = :pid",
            &[("pid", SqlValue::Text("20240101".into()))],
            ParamStyle::AtNamed,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE part = @pid");
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let result = translate_placeholders("SELECT :oops", &[], ParamStyle::Question);
        assert!(result.is_err());
    }
}
