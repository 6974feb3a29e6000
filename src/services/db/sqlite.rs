// SQLite handler backed by an sqlx pool
//
// Introspection goes through the pragma table-valued functions so table
// names stay bound as parameters.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row};
use std::str::FromStr;

use crate::models::connection::{ConnectionSpec, DatabaseEngine};
use crate::models::metadata::{
    ColumnInfo, Constraints, ForeignKey, IndexInfo, SampleRow, TableSchema, UniqueConstraint,
};
use crate::utils::{ApiError, ApiResult};

use super::{
    DatabaseHandler, ParamStyle, SqlValue, check_identifiers, row_i64, row_str,
    translate_placeholders,
};

pub struct SqliteHandler {
    pool: SqlitePool,
}

impl SqliteHandler {
    pub async fn connect(spec: &ConnectionSpec) -> ApiResult<Self> {
        let path = spec
            .database
            .clone()
            .ok_or_else(|| ApiError::validation_error("sqlite connection requires a file path"))?;

        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| ApiError::connection_failed(format!("sqlite: {}", e)))?
        } else {
            SqliteConnectOptions::new().filename(&path).read_only(false)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| ApiError::connection_failed(format!("sqlite: {}", e)))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests use in-memory databases)
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn value_at(row: &SqliteRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            if let Some(i) = v {
                return Value::from(i);
            }
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            if let Some(f) = v {
                return serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null);
            }
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            if let Some(s) = v {
                return Value::from(s);
            }
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            if let Some(bytes) = v {
                return Value::from(String::from_utf8_lossy(&bytes).to_string());
            }
        }
        Value::Null
    }

    fn row_to_json(row: &SqliteRow) -> SampleRow {
        let mut obj = SampleRow::new();
        for (idx, column) in row.columns().iter().enumerate() {
            obj.insert(column.name().to_string(), Self::value_at(row, idx));
        }
        obj
    }

    fn check_schema(schema: &str) -> ApiResult<()> {
        check_identifiers([schema])?;
        if schema != "main" && schema != "temp" {
            return Err(ApiError::not_found(format!("sqlite schema '{}'", schema)));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseHandler for SqliteHandler {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Sqlite
    }

    fn table_ref(&self, schema: &str, table: &str) -> String {
        if schema == "main" {
            format!("\"{}\"", table)
        } else {
            format!("\"{}\".\"{}\"", schema, table)
        }
    }

    async fn ping(&self) -> ApiResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| ApiError::connection_failed(format!("sqlite ping: {}", e)))?;
        Ok(())
    }

    async fn list_schemas(&self) -> ApiResult<Vec<String>> {
        Ok(vec!["main".to_string()])
    }

    async fn list_tables(&self, schema: &str) -> ApiResult<Vec<String>> {
        Self::check_schema(schema)?;
        let rows = self
            .fetch_all(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?;
        Ok(rows.iter().filter_map(|r| row_str(r, "name")).collect())
    }

    async fn table_schema(&self, schema: &str, table: &str) -> ApiResult<TableSchema> {
        Self::check_schema(schema)?;
        check_identifiers([table])?;
        let rows = self
            .fetch_all(
                "SELECT name, type, \"notnull\", pk FROM pragma_table_info(:table)",
                &[("table", SqlValue::Text(table.to_string()))],
            )
            .await?;

        let columns = rows
            .iter()
            .filter_map(|r| {
                let name = row_str(r, "name")?;
                let mut info = ColumnInfo::new(name, row_str(r, "type").unwrap_or_default());
                info.is_nullable = row_i64(r, "notnull") == Some(0);
                Some(info)
            })
            .collect();

        Ok(TableSchema { columns })
    }

    async fn table_indexes(&self, schema: &str, table: &str) -> ApiResult<Vec<IndexInfo>> {
        Self::check_schema(schema)?;
        check_identifiers([table])?;
        let list = self
            .fetch_all(
                "SELECT name, \"unique\", origin FROM pragma_index_list(:table)",
                &[("table", SqlValue::Text(table.to_string()))],
            )
            .await?;

        let mut indexes = Vec::new();
        for entry in &list {
            let Some(name) = row_str(entry, "name") else { continue };
            let columns = self
                .fetch_all(
                    "SELECT name FROM pragma_index_info(:index)",
                    &[("index", SqlValue::Text(name.clone()))],
                )
                .await?
                .iter()
                .filter_map(|r| row_str(r, "name"))
                .collect();
            indexes.push(IndexInfo {
                name,
                columns,
                unique: row_i64(entry, "unique") == Some(1),
                index_type: row_str(entry, "origin"),
            });
        }
        Ok(indexes)
    }

    async fn table_constraints(&self, schema: &str, table: &str) -> ApiResult<Constraints> {
        Self::check_schema(schema)?;
        check_identifiers([table])?;
        let mut constraints = Constraints::default();

        // Primary keys from table_info, ordered by their position in the key
        let mut pk_rows: Vec<(i64, String)> = self
            .fetch_all(
                "SELECT name, pk FROM pragma_table_info(:table) WHERE pk > 0",
                &[("table", SqlValue::Text(table.to_string()))],
            )
            .await?
            .iter()
            .filter_map(|r| Some((row_i64(r, "pk")?, row_str(r, "name")?)))
            .collect();
        pk_rows.sort_by_key(|(pos, _)| *pos);
        constraints.primary_keys = pk_rows.into_iter().map(|(_, name)| name).collect();

        let fk_rows = self
            .fetch_all(
                "SELECT id, \"table\", \"from\", \"to\", on_delete \
                 FROM pragma_foreign_key_list(:table) ORDER BY id, seq",
                &[("table", SqlValue::Text(table.to_string()))],
            )
            .await?;
        for row in &fk_rows {
            let id = row_i64(row, "id").unwrap_or_default();
            let name = Some(format!("fk_{}_{}", table, id));
            let column = row_str(row, "from").unwrap_or_default();
            let referenced_table = row_str(row, "table").unwrap_or_default();
            let referenced_column = row_str(row, "to").unwrap_or_default();
            if let Some(fk) = constraints.foreign_keys.iter_mut().find(|fk| fk.name == name) {
                fk.columns.push(column);
                fk.referenced_columns.push(referenced_column);
            } else {
                constraints.foreign_keys.push(ForeignKey {
                    name,
                    columns: vec![column],
                    referenced_table,
                    referenced_columns: vec![referenced_column],
                    on_delete: row_str(row, "on_delete"),
                });
            }
        }

        // Unique constraints surface as indexes with origin 'u'
        let index_list = self
            .fetch_all(
                "SELECT name, origin FROM pragma_index_list(:table) WHERE origin = 'u'",
                &[("table", SqlValue::Text(table.to_string()))],
            )
            .await?;
        for entry in &index_list {
            let Some(name) = row_str(entry, "name") else { continue };
            let columns = self
                .fetch_all(
                    "SELECT name FROM pragma_index_info(:index)",
                    &[("index", SqlValue::Text(name.clone()))],
                )
                .await?
                .iter()
                .filter_map(|r| row_str(r, "name"))
                .collect();
            constraints
                .unique_constraints
                .push(UniqueConstraint { name: Some(name), columns });
        }

        // CHECK constraints are not exposed through pragmas
        Ok(constraints)
    }

    async fn row_count(&self, schema: &str, table: &str, _estimate: bool) -> ApiResult<Option<i64>> {
        Self::check_schema(schema)?;
        check_identifiers([table])?;
        // SQLite keeps no usable planner estimate; count exactly
        let sql = format!("SELECT COUNT(*) AS count FROM {}", self.table_ref(schema, table));
        let rows = self.fetch_all(&sql, &[]).await?;
        Ok(rows.first().and_then(|r| row_i64(r, "count")))
    }

    async fn fetch_all(&self, sql: &str, params: &[(&str, SqlValue)]) -> ApiResult<Vec<SampleRow>> {
        let (sql, ordered) = translate_placeholders(sql, params, ParamStyle::Question)?;
        let mut query = sqlx::query(&sql);
        for (_, value) in &ordered {
            query = match value {
                SqlValue::Text(s) => query.bind(s.clone()),
                SqlValue::Int(i) => query.bind(*i),
                SqlValue::Float(f) => query.bind(*f),
                SqlValue::Bool(b) => query.bind(*b),
                SqlValue::Null => query.bind(None::<String>),
            };
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ApiError::internal_error(format!("sqlite query failed: {}", e)))?;
        Ok(rows.iter().map(Self::row_to_json).collect())
    }
}
