// PostgreSQL handler backed by an sqlx pool

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row};

use crate::models::connection::{ConnectionSpec, DatabaseEngine};
use crate::models::metadata::{
    CheckConstraint, ColumnInfo, Constraints, ForeignKey, IndexInfo, SampleRow, TableSchema,
    UniqueConstraint,
};
use crate::utils::{ApiError, ApiResult};

use super::{
    DatabaseHandler, ParamStyle, SqlValue, check_identifiers, row_i64, row_str,
    translate_placeholders,
};

pub struct PostgresHandler {
    pool: PgPool,
}

impl PostgresHandler {
    pub async fn connect(spec: &ConnectionSpec, secret: Option<String>) -> ApiResult<Self> {
        let mut options = PgConnectOptions::new();
        if let Some(host) = &spec.host {
            options = options.host(host);
        }
        if let Some(port) = spec.port {
            options = options.port(port);
        }
        if let Some(database) = &spec.database {
            options = options.database(database);
        }
        if let Some(username) = &spec.username {
            options = options.username(username);
        }
        if let Some(password) = &secret {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| ApiError::connection_failed(format!("postgres: {}", e)))?;

        Ok(Self { pool })
    }

    fn value_at(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::from).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(Value::from).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(Value::from).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.and_then(|f| serde_json::Number::from_f64(f).map(Value::Number)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v
                .and_then(|f| serde_json::Number::from_f64(f as f64).map(Value::Number))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::from).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<sqlx::types::BigDecimal>, _>(idx) {
            return v
                .and_then(|d| d.to_string().parse::<f64>().ok())
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::from).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return v.map(|d| Value::from(d.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v.map(|d| Value::from(d.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return v.map(|t| Value::from(t.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v.map(|d| Value::from(d.to_rfc3339())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.unwrap_or(Value::Null);
        }
        tracing::debug!("Unsupported postgres type at column {}, treating as NULL", idx);
        Value::Null
    }

    fn row_to_json(row: &PgRow) -> SampleRow {
        let mut obj = SampleRow::new();
        for (idx, column) in row.columns().iter().enumerate() {
            obj.insert(column.name().to_string(), Self::value_at(row, idx));
        }
        obj
    }
}

#[async_trait]
impl DatabaseHandler for PostgresHandler {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Postgres
    }

    async fn ping(&self) -> ApiResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| ApiError::connection_failed(format!("postgres ping: {}", e)))?;
        Ok(())
    }

    async fn list_schemas(&self) -> ApiResult<Vec<String>> {
        let rows = self
            .fetch_all(
                "SELECT schema_name FROM information_schema.schemata \
                 WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast') \
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
                "SELECT c.column_name, c.data_type, c.is_nullable, c.numeric_precision, \
                        c.numeric_scale, c.character_maximum_length, pgd.description AS comment \
                 FROM information_schema.columns c \
                 LEFT JOIN pg_catalog.pg_statio_all_tables st \
                   ON st.schemaname = c.table_schema AND st.relname = c.table_name \
                 LEFT JOIN pg_catalog.pg_description pgd \
                   ON pgd.objoid = st.relid AND pgd.objsubid = c.ordinal_position \
                 WHERE c.table_schema = :schema AND c.table_name = :table \
                 ORDER BY c.ordinal_position",
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
                info.comment = row_str(r, "comment");
                Some(info)
            })
            .collect();

        Ok(TableSchema { columns })
    }

    async fn table_indexes(&self, schema: &str, table: &str) -> ApiResult<Vec<IndexInfo>> {
        check_identifiers([schema, table])?;
        let rows = self
            .fetch_all(
                "SELECT i.relname AS index_name, ix.indisunique AS is_unique, \
                        am.amname AS index_type, a.attname AS column_name \
                 FROM pg_class t \
                 JOIN pg_namespace n ON n.oid = t.relnamespace \
                 JOIN pg_index ix ON t.oid = ix.indrelid \
                 JOIN pg_class i ON i.oid = ix.indexrelid \
                 JOIN pg_am am ON i.relam = am.oid \
                 JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
                 WHERE n.nspname = :schema AND t.relname = :table \
                 ORDER BY i.relname, a.attnum",
                &[
                    ("schema", SqlValue::Text(schema.to_string())),
                    ("table", SqlValue::Text(table.to_string())),
                ],
            )
            .await?;

        let mut indexes: Vec<IndexInfo> = Vec::new();
        for row in &rows {
            let Some(name) = row_str(row, "index_name") else { continue };
            let column = row_str(row, "column_name").unwrap_or_default();
            if let Some(existing) = indexes.iter_mut().find(|i| i.name == name) {
                existing.columns.push(column);
            } else {
                indexes.push(IndexInfo {
                    name,
                    columns: vec![column],
                    unique: row
                        .get("is_unique")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                    index_type: row_str(row, "index_type"),
                });
            }
        }
        Ok(indexes)
    }

    async fn table_constraints(&self, schema: &str, table: &str) -> ApiResult<Constraints> {
        check_identifiers([schema, table])?;
        let params = [
            ("schema", SqlValue::Text(schema.to_string())),
            ("table", SqlValue::Text(table.to_string())),
        ];

        let mut constraints = Constraints::default();

        let pk_rows = self
            .fetch_all(
                "SELECT kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
                 WHERE tc.constraint_type = 'PRIMARY KEY' \
                   AND tc.table_schema = :schema AND tc.table_name = :table \
                 ORDER BY kcu.ordinal_position",
                &params,
            )
            .await?;
        constraints.primary_keys =
            pk_rows.iter().filter_map(|r| row_str(r, "column_name")).collect();

        let fk_rows = self
            .fetch_all(
                "SELECT tc.constraint_name, kcu.column_name, \
                        ccu.table_name AS referenced_table, ccu.column_name AS referenced_column, \
                        rc.delete_rule \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
                 JOIN information_schema.constraint_column_usage ccu \
                   ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
                 JOIN information_schema.referential_constraints rc \
                   ON rc.constraint_name = tc.constraint_name AND rc.constraint_schema = tc.table_schema \
                 WHERE tc.constraint_type = 'FOREIGN KEY' \
                   AND tc.table_schema = :schema AND tc.table_name = :table \
                 ORDER BY tc.constraint_name, kcu.ordinal_position",
                &params,
            )
            .await?;
        for row in &fk_rows {
            let name = row_str(row, "constraint_name");
            let column = row_str(row, "column_name").unwrap_or_default();
            let referenced_table = row_str(row, "referenced_table").unwrap_or_default();
            let referenced_column = row_str(row, "referenced_column").unwrap_or_default();
            if let Some(fk) = constraints
                .foreign_keys
                .iter_mut()
                .find(|fk| fk.name == name)
            {
                fk.columns.push(column);
                fk.referenced_columns.push(referenced_column);
            } else {
                constraints.foreign_keys.push(ForeignKey {
                    name,
                    columns: vec![column],
                    referenced_table,
                    referenced_columns: vec![referenced_column],
                    on_delete: row_str(row, "delete_rule"),
                });
            }
        }

        let unique_rows = self
            .fetch_all(
                "SELECT tc.constraint_name, kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
                 WHERE tc.constraint_type = 'UNIQUE' \
                   AND tc.table_schema = :schema AND tc.table_name = :table \
                 ORDER BY tc.constraint_name, kcu.ordinal_position",
                &params,
            )
            .await?;
        for row in &unique_rows {
            let name = row_str(row, "constraint_name");
            let column = row_str(row, "column_name").unwrap_or_default();
            if let Some(uc) = constraints
                .unique_constraints
                .iter_mut()
                .find(|uc| uc.name == name)
            {
                uc.columns.push(column);
            } else {
                constraints
                    .unique_constraints
                    .push(UniqueConstraint { name, columns: vec![column] });
            }
        }

        let check_rows = self
            .fetch_all(
                "SELECT cc.constraint_name, cc.check_clause \
                 FROM information_schema.check_constraints cc \
                 JOIN information_schema.table_constraints tc \
                   ON tc.constraint_name = cc.constraint_name AND tc.constraint_schema = cc.constraint_schema \
                 WHERE tc.table_schema = :schema AND tc.table_name = :table \
                   AND tc.constraint_type = 'CHECK'",
                &params,
            )
            .await?;
        constraints.check_constraints = check_rows
            .iter()
            .filter_map(|r| {
                Some(CheckConstraint {
                    name: row_str(r, "constraint_name"),
                    expression: row_str(r, "check_clause")?,
                })
            })
            .collect();

        Ok(constraints)
    }

    async fn row_count(&self, schema: &str, table: &str, estimate: bool) -> ApiResult<Option<i64>> {
        check_identifiers([schema, table])?;
        if estimate {
            let rows = self
                .fetch_all(
                    "SELECT reltuples::bigint AS estimate FROM pg_class c \
                     JOIN pg_namespace n ON n.oid = c.relnamespace \
                     WHERE n.nspname = :schema AND c.relname = :table",
                    &[
                        ("schema", SqlValue::Text(schema.to_string())),
                        ("table", SqlValue::Text(table.to_string())),
                    ],
                )
                .await?;
            if let Some(estimate) = rows.first().and_then(|r| row_i64(r, "estimate")) {
                if estimate > 0 {
                    return Ok(Some(estimate));
                }
            }
        }
        // Exact count as last resort (planner stats absent or disabled)
        let sql = format!("SELECT COUNT(*) AS count FROM {}", self.table_ref(schema, table));
        let rows = self.fetch_all(&sql, &[]).await?;
        Ok(rows.first().and_then(|r| row_i64(r, "count")))
    }

    async fn fetch_all(&self, sql: &str, params: &[(&str, SqlValue)]) -> ApiResult<Vec<SampleRow>> {
        let (sql, ordered) = translate_placeholders(sql, params, ParamStyle::Numbered)?;
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
            .map_err(|e| ApiError::internal_error(format!("postgres query failed: {}", e)))?;
        Ok(rows.iter().map(Self::row_to_json).collect())
    }
}
