// MySQL handler backed by a mysql_async pool

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts};
use serde_json::Value;

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

pub struct MySqlHandler {
    pool: Pool,
}

impl MySqlHandler {
    pub async fn connect(spec: &ConnectionSpec, secret: Option<String>) -> ApiResult<Self> {
        let constraints = PoolConstraints::new(1, 5)
            .ok_or_else(|| ApiError::internal_error("invalid mysql pool constraints"))?;

        let opts = OptsBuilder::default()
            .ip_or_hostname(spec.host.clone().unwrap_or_else(|| "localhost".to_string()))
            .tcp_port(spec.port.unwrap_or(3306))
            .user(spec.username.clone())
            .pass(secret)
            .db_name(spec.database.clone())
            .prefer_socket(false)
            .ssl_opts(None::<SslOpts>)
            .tcp_keepalive(Some(30_000_u32))
            .tcp_nodelay(true)
            .pool_opts(
                PoolOpts::default()
                    .with_constraints(constraints)
                    .with_inactive_connection_ttl(std::time::Duration::from_secs(300)),
            );

        let pool = Pool::new(opts);

        // Pool construction is lazy; probe now so bad specs fail at resolve time
        let handler = Self { pool };
        handler.ping().await?;
        Ok(handler)
    }

    fn mysql_value(value: &SqlValue) -> mysql_async::Value {
        match value {
            SqlValue::Text(s) => mysql_async::Value::Bytes(s.clone().into_bytes()),
            SqlValue::Int(i) => mysql_async::Value::Int(*i),
            SqlValue::Float(f) => mysql_async::Value::Double(*f),
            SqlValue::Bool(b) => mysql_async::Value::Int(i64::from(*b)),
            SqlValue::Null => mysql_async::Value::NULL,
        }
    }

    fn json_value(value: &mysql_async::Value) -> Value {
        match value {
            mysql_async::Value::NULL => Value::Null,
            mysql_async::Value::Bytes(bytes) => {
                Value::String(String::from_utf8_lossy(bytes).to_string())
            }
            mysql_async::Value::Int(i) => Value::from(*i),
            mysql_async::Value::UInt(u) => Value::from(*u),
            mysql_async::Value::Float(f) => serde_json::Number::from_f64(f64::from(*f))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            mysql_async::Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            mysql_async::Value::Date(y, mo, d, h, mi, s, _) => {
                if *h == 0 && *mi == 0 && *s == 0 {
                    Value::String(format!("{:04}-{:02}-{:02}", y, mo, d))
                } else {
                    Value::String(format!(
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                        y, mo, d, h, mi, s
                    ))
                }
            }
            mysql_async::Value::Time(neg, days, h, mi, s, _) => {
                let sign = if *neg { "-" } else { "" };
                Value::String(format!("{}{:02}:{:02}:{:02}", sign, u32::from(*h) + days * 24, mi, s))
            }
        }
    }

    fn rows_to_json(rows: Vec<mysql_async::Row>) -> Vec<SampleRow> {
        rows.iter()
            .map(|row| {
                let mut obj = SampleRow::new();
                for (idx, column) in row.columns_ref().iter().enumerate() {
                    obj.insert(column.name_str().to_string(), Self::json_value(&row[idx]));
                }
                obj
            })
            .collect()
    }
}

#[async_trait]
impl DatabaseHandler for MySqlHandler {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Mysql
    }

    fn table_ref(&self, schema: &str, table: &str) -> String {
        format!("`{}`.`{}`", schema, table)
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident)
    }

    async fn ping(&self) -> ApiResult<()> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| ApiError::connection_failed(format!("mysql: {}", e)))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| ApiError::connection_failed(format!("mysql ping: {}", e)))?;
        Ok(())
    }

    async fn list_schemas(&self) -> ApiResult<Vec<String>> {
        let rows = self
            .fetch_all(
                "SELECT schema_name FROM information_schema.schemata \
                 WHERE schema_name NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys') \
                 ORDER BY schema_name",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| row_str(r, "schema_name").or_else(|| row_str(r, "SCHEMA_NAME")))
            .collect())
    }

    async fn list_tables(&self, schema: &str) -> ApiResult<Vec<String>> {
        check_identifiers([schema])?;
        let rows = self
            .fetch_all(
                "SELECT table_name AS table_name FROM information_schema.tables \
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
                "SELECT column_name AS column_name, data_type AS data_type, \
                        is_nullable AS is_nullable, numeric_precision AS numeric_precision, \
                        numeric_scale AS numeric_scale, \
                        character_maximum_length AS character_maximum_length, \
                        column_comment AS column_comment \
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
                info.comment = row_str(r, "column_comment").filter(|c| !c.is_empty());
                Some(info)
            })
            .collect();

        Ok(TableSchema { columns })
    }

    async fn table_indexes(&self, schema: &str, table: &str) -> ApiResult<Vec<IndexInfo>> {
        check_identifiers([schema, table])?;
        let rows = self
            .fetch_all(
                "SELECT index_name AS index_name, non_unique AS non_unique, \
                        index_type AS index_type, column_name AS column_name \
                 FROM information_schema.statistics \
                 WHERE table_schema = :schema AND table_name = :table \
                 ORDER BY index_name, seq_in_index",
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
                    unique: row_i64(row, "non_unique") == Some(0),
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

        let key_rows = self
            .fetch_all(
                "SELECT kcu.constraint_name AS constraint_name, kcu.column_name AS column_name, \
                        kcu.referenced_table_name AS referenced_table, \
                        kcu.referenced_column_name AS referenced_column, \
                        tc.constraint_type AS constraint_type \
                 FROM information_schema.key_column_usage kcu \
                 JOIN information_schema.table_constraints tc \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema AND tc.table_name = kcu.table_name \
                 WHERE kcu.table_schema = :schema AND kcu.table_name = :table \
                 ORDER BY kcu.constraint_name, kcu.ordinal_position",
                &params,
            )
            .await?;

        for row in &key_rows {
            let kind = row_str(row, "constraint_type").unwrap_or_default();
            let column = row_str(row, "column_name").unwrap_or_default();
            match kind.as_str() {
                "PRIMARY KEY" => constraints.primary_keys.push(column),
                "UNIQUE" => {
                    let name = row_str(row, "constraint_name");
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
                "FOREIGN KEY" => {
                    let name = row_str(row, "constraint_name");
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
                            on_delete: None,
                        });
                    }
                }
                _ => {}
            }
        }

        // Delete rules live in referential_constraints
        if !constraints.foreign_keys.is_empty() {
            let rule_rows = self
                .fetch_all(
                    "SELECT constraint_name AS constraint_name, delete_rule AS delete_rule \
                     FROM information_schema.referential_constraints \
                     WHERE constraint_schema = :schema AND table_name = :table",
                    &params,
                )
                .await
                .unwrap_or_default();
            for row in &rule_rows {
                let name = row_str(row, "constraint_name");
                if let Some(fk) = constraints.foreign_keys.iter_mut().find(|fk| fk.name == name) {
                    fk.on_delete = row_str(row, "delete_rule");
                }
            }
        }

        // CHECK constraints appeared in MySQL 8; tolerate older servers
        match self
            .fetch_all(
                "SELECT cc.constraint_name AS constraint_name, cc.check_clause AS check_clause \
                 FROM information_schema.check_constraints cc \
                 JOIN information_schema.table_constraints tc \
                   ON tc.constraint_name = cc.constraint_name \
                  AND tc.constraint_schema = cc.constraint_schema \
                 WHERE tc.table_schema = :schema AND tc.table_name = :table",
                &params,
            )
            .await
        {
            Ok(rows) => {
                constraints.check_constraints = rows
                    .iter()
                    .filter_map(|r| {
                        Some(CheckConstraint {
                            name: row_str(r, "constraint_name"),
                            expression: row_str(r, "check_clause")?,
                        })
                    })
                    .collect();
            }
            Err(e) => tracing::debug!("check_constraints not available: {}", e),
        }

        Ok(constraints)
    }

    async fn row_count(&self, schema: &str, table: &str, estimate: bool) -> ApiResult<Option<i64>> {
        check_identifiers([schema, table])?;
        if estimate {
            let rows = self
                .fetch_all(
                    "SELECT table_rows AS table_rows FROM information_schema.tables \
                     WHERE table_schema = :schema AND table_name = :table",
                    &[
                        ("schema", SqlValue::Text(schema.to_string())),
                        ("table", SqlValue::Text(table.to_string())),
                    ],
                )
                .await?;
            if let Some(estimate) = rows.first().and_then(|r| row_i64(r, "table_rows")) {
                if estimate > 0 {
                    return Ok(Some(estimate));
                }
            }
        }
        let sql = format!("SELECT COUNT(*) AS count FROM {}", self.table_ref(schema, table));
        let rows = self.fetch_all(&sql, &[]).await?;
        Ok(rows.first().and_then(|r| row_i64(r, "count")))
    }

    async fn fetch_all(&self, sql: &str, params: &[(&str, SqlValue)]) -> ApiResult<Vec<SampleRow>> {
        let (sql, ordered) = translate_placeholders(sql, params, ParamStyle::Question)?;

        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| ApiError::connection_failed(format!("mysql: {}", e)))?;

        let rows: Vec<mysql_async::Row> = if ordered.is_empty() {
            conn.query(sql.as_str())
                .await
                .map_err(|e| ApiError::internal_error(format!("mysql query failed: {}", e)))?
        } else {
            let values: Vec<mysql_async::Value> =
                ordered.iter().map(|(_, v)| Self::mysql_value(v)).collect();
            conn.exec(sql.as_str(), values)
                .await
                .map_err(|e| ApiError::internal_error(format!("mysql query failed: {}", e)))?
        };

        drop(conn);

        Ok(Self::rows_to_json(rows))
    }
}
