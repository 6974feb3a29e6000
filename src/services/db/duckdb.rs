// DuckDB handler
//
// The driver is synchronous; every call runs under spawn_blocking with the
// connection behind a mutex.

use async_trait::async_trait;
use duckdb::Connection;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::models::connection::{ConnectionSpec, DatabaseEngine};
use crate::models::metadata::{
    CheckConstraint, ColumnInfo, Constraints, IndexInfo, SampleRow, TableSchema, UniqueConstraint,
};
use crate::utils::{ApiError, ApiResult};

use super::{
    DatabaseHandler, ParamStyle, SqlValue, check_identifiers, row_i64, row_str,
    translate_placeholders,
};

pub struct DuckDbHandler {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbHandler {
    pub async fn connect(spec: &ConnectionSpec) -> ApiResult<Self> {
        let path = spec
            .database
            .clone()
            .ok_or_else(|| ApiError::validation_error("duckdb connection requires a file path"))?;

        let conn = tokio::task::spawn_blocking(move || {
            if path == ":memory:" {
                Connection::open_in_memory()
            } else {
                Connection::open(&path)
            }
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("duckdb open task: {}", e)))?
        .map_err(|e| ApiError::connection_failed(format!("duckdb: {}", e)))?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> ApiResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> ApiResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| ApiError::internal_error("duckdb connection mutex poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("duckdb task join: {}", e)))?
    }

    fn duck_value(value: &SqlValue) -> duckdb::types::Value {
        match value {
            SqlValue::Text(s) => duckdb::types::Value::Text(s.clone()),
            SqlValue::Int(i) => duckdb::types::Value::BigInt(*i),
            SqlValue::Float(f) => duckdb::types::Value::Double(*f),
            SqlValue::Bool(b) => duckdb::types::Value::Boolean(*b),
            SqlValue::Null => duckdb::types::Value::Null,
        }
    }

    fn json_value(value: duckdb::types::Value) -> Value {
        use duckdb::types::Value as Dv;
        match value {
            Dv::Null => Value::Null,
            Dv::Boolean(b) => Value::from(b),
            Dv::TinyInt(i) => Value::from(i),
            Dv::SmallInt(i) => Value::from(i),
            Dv::Int(i) => Value::from(i),
            Dv::BigInt(i) => Value::from(i),
            Dv::HugeInt(i) => Value::from(i as i64),
            Dv::UTinyInt(u) => Value::from(u),
            Dv::USmallInt(u) => Value::from(u),
            Dv::UInt(u) => Value::from(u),
            Dv::UBigInt(u) => Value::from(u),
            Dv::Float(f) => serde_json::Number::from_f64(f64::from(f))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Dv::Double(f) => {
                serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
            }
            Dv::Decimal(d) => d
                .to_string()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Dv::Text(s) => Value::from(s),
            Dv::Blob(bytes) => Value::from(String::from_utf8_lossy(&bytes).to_string()),
            Dv::List(values) => Value::Array(values.into_iter().map(Self::json_value).collect()),
            other => Value::from(format!("{:?}", other)),
        }
    }

    fn run_query(
        conn: &Connection,
        sql: &str,
        values: Vec<duckdb::types::Value>,
    ) -> ApiResult<Vec<SampleRow>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| ApiError::internal_error(format!("duckdb prepare failed: {}", e)))?;
        let mut rows = stmt
            .query(duckdb::params_from_iter(values))
            .map_err(|e| ApiError::internal_error(format!("duckdb query failed: {}", e)))?;

        let mut out = Vec::new();
        loop {
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => {
                    return Err(ApiError::internal_error(format!("duckdb row read failed: {}", e)));
                }
            };
            let stmt_ref = row.as_ref();
            let count = stmt_ref.column_count();
            let mut obj = SampleRow::new();
            for idx in 0..count {
                let name = stmt_ref
                    .column_name(idx)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|_| format!("column_{}", idx));
                let value: duckdb::types::Value = row
                    .get(idx)
                    .map_err(|e| ApiError::internal_error(format!("duckdb value read: {}", e)))?;
                obj.insert(name, Self::json_value(value));
            }
            out.push(obj);
        }
        Ok(out)
    }
}

#[async_trait]
impl DatabaseHandler for DuckDbHandler {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Duckdb
    }

    fn table_ref(&self, schema: &str, table: &str) -> String {
        if schema == "main" {
            format!("\"{}\"", table)
        } else {
            format!("\"{}\".\"{}\"", schema, table)
        }
    }

    async fn ping(&self) -> ApiResult<()> {
        self.fetch_all("SELECT 1", &[]).await.map(|_| ())
    }

    async fn list_schemas(&self) -> ApiResult<Vec<String>> {
        let rows = self
            .fetch_all(
                "SELECT schema_name FROM information_schema.schemata \
                 WHERE schema_name NOT IN ('information_schema', 'pg_catalog') \
                 ORDER BY schema_name",
                &[],
            )
            .await?;
        Ok(rows.iter().filter_map(|r| row_str(r, "schema_name")).collect())
    }

    async fn list_tables(&self, schema: &str) -> ApiResult<Vec<String>> {
        check_identifiers([schema])?;
        let rows = self
            .fetch_all(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = :schema AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[("schema", SqlValue::Text(schema.to_string()))],
            )
            .await?;
        Ok(rows.iter().filter_map(|r| row_str(r, "table_name")).collect())
    }

    async fn table_schema(&self, schema: &str, table: &str) -> ApiResult<TableSchema> {
        check_identifiers([schema, table])?;
        let rows = self
            .fetch_all(
                "SELECT column_name, data_type, is_nullable, numeric_precision, numeric_scale, \
                        character_maximum_length \
                 FROM information_schema.columns \
                 WHERE table_schema = :schema AND table_name = :table \
                 ORDER BY ordinal_position",
                &[
                    ("schema", SqlValue::Text(schema.to_string())),
                    ("table", SqlValue::Text(table.to_string())),
                ],
            )
            .await?;

        let columns = rows
            .iter()
            .filter_map(|r| {
                let name = row_str(r, "column_name")?;
                let mut info = ColumnInfo::new(name, row_str(r, "data_type").unwrap_or_default());
                info.is_nullable = row_str(r, "is_nullable").as_deref() == Some("YES");
                info.numeric_precision = row_i64(r, "numeric_precision");
                info.numeric_scale = row_i64(r, "numeric_scale");
                info.character_maximum_length = row_i64(r, "character_maximum_length");
                Some(info)
            })
            .collect();

        Ok(TableSchema { columns })
    }

    async fn table_indexes(&self, schema: &str, table: &str) -> ApiResult<Vec<IndexInfo>> {
        check_identifiers([schema, table])?;
        let rows = self
            .fetch_all(
                "SELECT index_name, is_unique, sql FROM duckdb_indexes() \
                 WHERE schema_name = :schema AND table_name = :table",
                &[
                    ("schema", SqlValue::Text(schema.to_string())),
                    ("table", SqlValue::Text(table.to_string())),
                ],
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|r| {
                let name = row_str(r, "index_name")?;
                // Column list only exists inside the CREATE INDEX text
                let columns = row_str(r, "sql")
                    .and_then(|sql| {
                        let start = sql.find('(')?;
                        let end = sql.rfind(')')?;
                        Some(
                            sql[start + 1..end]
                                .split(',')
                                .map(|c| c.trim().trim_matches('"').to_string())
                                .collect::<Vec<_>>(),
                        )
                    })
                    .unwrap_or_default();
                Some(IndexInfo {
                    name,
                    columns,
                    unique: r.get("is_unique").and_then(|v| v.as_bool()).unwrap_or(false),
                    index_type: None,
                })
            })
            .collect())
    }

    async fn table_constraints(&self, schema: &str, table: &str) -> ApiResult<Constraints> {
        check_identifiers([schema, table])?;
        let rows = self
            .fetch_all(
                "SELECT constraint_type, constraint_text, constraint_column_names \
                 FROM duckdb_constraints() \
                 WHERE schema_name = :schema AND table_name = :table",
                &[
                    ("schema", SqlValue::Text(schema.to_string())),
                    ("table", SqlValue::Text(table.to_string())),
                ],
            )
            .await?;

        let mut constraints = Constraints::default();
        for row in &rows {
            let kind = row_str(row, "constraint_type").unwrap_or_default();
            let columns: Vec<String> = row
                .get("constraint_column_names")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect()
                })
                .unwrap_or_default();
            match kind.as_str() {
                "PRIMARY KEY" => constraints.primary_keys.extend(columns),
                "UNIQUE" => constraints
                    .unique_constraints
                    .push(UniqueConstraint { name: None, columns }),
                "CHECK" => {
                    if let Some(expression) = row_str(row, "constraint_text") {
                        constraints
                            .check_constraints
                            .push(CheckConstraint { name: None, expression });
                    }
                }
                // duckdb_constraints() does not expose FK targets
                _ => {}
            }
        }
        Ok(constraints)
    }

    async fn row_count(&self, schema: &str, table: &str, estimate: bool) -> ApiResult<Option<i64>> {
        check_identifiers([schema, table])?;
        if estimate {
            let rows = self
                .fetch_all(
                    "SELECT estimated_size FROM duckdb_tables() \
                     WHERE schema_name = :schema AND table_name = :table",
                    &[
                        ("schema", SqlValue::Text(schema.to_string())),
                        ("table", SqlValue::Text(table.to_string())),
                    ],
                )
                .await?;
            if let Some(size) = rows.first().and_then(|r| row_i64(r, "estimated_size")) {
                if size > 0 {
                    return Ok(Some(size));
                }
            }
        }
        let sql = format!("SELECT COUNT(*) AS count FROM {}", self.table_ref(schema, table));
        let rows = self.fetch_all(&sql, &[]).await?;
        Ok(rows.first().and_then(|r| row_i64(r, "count")))
    }

    async fn fetch_all(&self, sql: &str, params: &[(&str, SqlValue)]) -> ApiResult<Vec<SampleRow>> {
        let (sql, ordered) = translate_placeholders(sql, params, ParamStyle::Question)?;
        let values: Vec<duckdb::types::Value> =
            ordered.iter().map(|(_, v)| Self::duck_value(v)).collect();
        self.with_conn(move |conn| Self::run_query(conn, &sql, values)).await
    }
}
