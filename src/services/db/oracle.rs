// Oracle handler
//
// The driver is synchronous; calls run under spawn_blocking. Values come
// back through Oracle's string conversion and are re-typed downstream.

use async_trait::async_trait;
use oracle::Connection;
use oracle::sql_type::ToSql;
use serde_json::Value;
use std::sync::{Arc, Mutex};

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

pub struct OracleHandler {
    conn: Arc<Mutex<Connection>>,
}

impl OracleHandler {
    pub async fn connect(spec: &ConnectionSpec, secret: Option<String>) -> ApiResult<Self> {
        let username = spec
            .username
            .clone()
            .ok_or_else(|| ApiError::validation_error("oracle connection requires a username"))?;
        let password = secret.ok_or_else(|| ApiError::auth_missing(spec.name.clone()))?;
        let host = spec.host.clone().unwrap_or_else(|| "localhost".to_string());
        let port = spec.port.unwrap_or(1521);
        let service = spec.database.clone().unwrap_or_default();
        let connect_string = format!("//{}:{}/{}", host, port, service);

        let conn = tokio::task::spawn_blocking(move || {
            Connection::connect(&username, &password, &connect_string)
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("oracle connect task: {}", e)))?
        .map_err(|e| ApiError::connection_failed(format!("oracle: {}", e)))?;

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
                .map_err(|_| ApiError::internal_error("oracle connection mutex poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("oracle task join: {}", e)))?
    }

    fn run_query(
        conn: &Connection,
        sql: &str,
        params: Vec<(String, SqlValue)>,
    ) -> ApiResult<Vec<SampleRow>> {
        let owned: Vec<Box<dyn ToSql>> = params
            .iter()
            .map(|(_, v)| match v {
                SqlValue::Text(s) => Box::new(s.clone()) as Box<dyn ToSql>,
                SqlValue::Int(i) => Box::new(*i) as Box<dyn ToSql>,
                SqlValue::Float(f) => Box::new(*f) as Box<dyn ToSql>,
                SqlValue::Bool(b) => Box::new(i64::from(*b)) as Box<dyn ToSql>,
                SqlValue::Null => Box::new(None::<String>) as Box<dyn ToSql>,
            })
            .collect();
        let named: Vec<(&str, &dyn ToSql)> = params
            .iter()
            .zip(owned.iter())
            .map(|((name, _), value)| (name.as_str(), value.as_ref() as &dyn ToSql))
            .collect();

        let rows = if named.is_empty() {
            conn.query(sql, &[])
        } else {
            conn.query_named(sql, &named)
        }
        .map_err(|e| ApiError::internal_error(format!("oracle query failed: {}", e)))?;

        let column_names: Vec<String> =
            rows.column_info().iter().map(|ci| ci.name().to_lowercase()).collect();

        let mut out = Vec::new();
        for row_result in rows {
            let row = row_result
                .map_err(|e| ApiError::internal_error(format!("oracle row read failed: {}", e)))?;
            let mut obj = SampleRow::new();
            for (idx, name) in column_names.iter().enumerate() {
                let value: Option<String> = row.get(idx).ok().flatten();
                obj.insert(name.clone(), value.map(Value::from).unwrap_or(Value::Null));
            }
            out.push(obj);
        }
        Ok(out)
    }
}

#[async_trait]
impl DatabaseHandler for OracleHandler {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Oracle
    }

    // Safe identifiers resolve case-insensitively; no quoting needed
    fn table_ref(&self, schema: &str, table: &str) -> String {
        format!("{}.{}", schema, table)
    }

    fn quote_ident(&self, ident: &str) -> String {
        ident.to_string()
    }

    fn limit_clause(&self, limit: usize, offset: usize) -> String {
        if offset == 0 {
            format!("FETCH NEXT {} ROWS ONLY", limit)
        } else {
            format!("OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", offset, limit)
        }
    }

    async fn ping(&self) -> ApiResult<()> {
        self.fetch_all("SELECT 1 FROM dual", &[]).await.map(|_| ())
    }

    async fn list_schemas(&self) -> ApiResult<Vec<String>> {
        // oracle_maintained requires 12c; fall back to the full list
        let rows = match self
            .fetch_all(
                "SELECT username FROM all_users \
                 WHERE oracle_maintained = 'N' ORDER BY username",
                &[],
            )
            .await
        {
            Ok(rows) => rows,
            Err(_) => {
                self.fetch_all("SELECT username FROM all_users ORDER BY username", &[])
                    .await?
            }
        };
        Ok(rows.iter().filter_map(|r| row_str(r, "username")).collect())
    }

    async fn list_tables(&self, schema: &str) -> ApiResult<Vec<String>> {
        check_identifiers([schema])?;
        let rows = self
            .fetch_all(
                "SELECT table_name FROM all_tables WHERE owner = UPPER(:schema) ORDER BY table_name",
                &[("schema", SqlValue::Text(schema.to_string()))],
            )
            .await?;
        Ok(rows.iter().filter_map(|r| row_str(r, "table_name")).collect())
    }

    async fn table_schema(&self, schema: &str, table: &str) -> ApiResult<TableSchema> {
        check_identifiers([schema, table])?;
        let rows = self
            .fetch_all(
                "SELECT c.column_name, c.data_type, c.nullable, c.data_precision, c.data_scale, \
                        c.char_length, cc.comments \
                 FROM all_tab_columns c \
                 LEFT JOIN all_col_comments cc \
                   ON cc.owner = c.owner AND cc.table_name = c.table_name \
                  AND cc.column_name = c.column_name \
                 WHERE c.owner = UPPER(:schema) AND c.table_name = UPPER(:table_name) \
                 ORDER BY c.column_id",
                &[
                    ("schema", SqlValue::Text(schema.to_string())),
                    ("table_name", SqlValue::Text(table.to_string())),
                ],
            )
            .await?;

        let columns = rows
            .iter()
            .filter_map(|r| {
                let name = row_str(r, "column_name")?;
                let mut info = ColumnInfo::new(name, row_str(r, "data_type").unwrap_or_default());
                info.is_nullable = row_str(r, "nullable").as_deref() == Some("Y");
                info.numeric_precision = row_i64(r, "data_precision");
                info.numeric_scale = row_i64(r, "data_scale");
                info.character_maximum_length = row_i64(r, "char_length").filter(|l| *l > 0);
                info.comment = row_str(r, "comments");
                Some(info)
            })
            .collect();

        Ok(TableSchema { columns })
    }

    async fn table_indexes(&self, schema: &str, table: &str) -> ApiResult<Vec<IndexInfo>> {
        check_identifiers([schema, table])?;
        let rows = self
            .fetch_all(
                "SELECT i.index_name, i.uniqueness, i.index_type, ic.column_name \
                 FROM all_indexes i \
                 JOIN all_ind_columns ic \
                   ON ic.index_owner = i.owner AND ic.index_name = i.index_name \
                 WHERE i.table_owner = UPPER(:schema) AND i.table_name = UPPER(:table_name) \
                 ORDER BY i.index_name, ic.column_position",
                &[
                    ("schema", SqlValue::Text(schema.to_string())),
                    ("table_name", SqlValue::Text(table.to_string())),
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
                    unique: row_str(row, "uniqueness").as_deref() == Some("UNIQUE"),
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
            ("table_name", SqlValue::Text(table.to_string())),
        ];

        let mut constraints = Constraints::default();

        let key_rows = self
            .fetch_all(
                "SELECT c.constraint_name, c.constraint_type, c.delete_rule, cc.column_name, \
                        rc.table_name AS referenced_table, rcc.column_name AS referenced_column \
                 FROM all_constraints c \
                 JOIN all_cons_columns cc \
                   ON cc.owner = c.owner AND cc.constraint_name = c.constraint_name \
                 LEFT JOIN all_constraints rc \
                   ON rc.owner = c.r_owner AND rc.constraint_name = c.r_constraint_name \
                 LEFT JOIN all_cons_columns rcc \
                   ON rcc.owner = rc.owner AND rcc.constraint_name = rc.constraint_name \
                  AND rcc.position = cc.position \
                 WHERE c.owner = UPPER(:schema) AND c.table_name = UPPER(:table_name) \
                   AND c.constraint_type IN ('P', 'R', 'U') \
                 ORDER BY c.constraint_name, cc.position",
                &params,
            )
            .await?;

        for row in &key_rows {
            let kind = row_str(row, "constraint_type").unwrap_or_default();
            let column = row_str(row, "column_name").unwrap_or_default();
            let name = row_str(row, "constraint_name");
            match kind.as_str() {
                "P" => constraints.primary_keys.push(column),
                "U" => {
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
                "R" => {
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
                _ => {}
            }
        }

        // search_condition_vc needs 12.2+; older servers just skip checks
        match self
            .fetch_all(
                "SELECT constraint_name, search_condition_vc AS condition \
                 FROM all_constraints \
                 WHERE owner = UPPER(:schema) AND table_name = UPPER(:table_name) \
                   AND constraint_type = 'C'",
                &params,
            )
            .await
        {
            Ok(rows) => {
                constraints.check_constraints = rows
                    .iter()
                    .filter_map(|r| {
                        let expression = row_str(r, "condition")?;
                        // Oracle surfaces NOT NULL as generated checks; drop them
                        if expression.to_uppercase().contains("IS NOT NULL") {
                            return None;
                        }
                        Some(CheckConstraint {
                            name: row_str(r, "constraint_name"),
                            expression,
                        })
                    })
                    .collect();
            }
            Err(e) => tracing::debug!("check constraint introspection unavailable: {}", e),
        }

        Ok(constraints)
    }

    async fn row_count(&self, schema: &str, table: &str, estimate: bool) -> ApiResult<Option<i64>> {
        check_identifiers([schema, table])?;
        if estimate {
            let rows = self
                .fetch_all(
                    "SELECT num_rows FROM all_tables \
                     WHERE owner = UPPER(:schema) AND table_name = UPPER(:table_name)",
                    &[
                        ("schema", SqlValue::Text(schema.to_string())),
                        ("table_name", SqlValue::Text(table.to_string())),
                    ],
                )
                .await?;
            if let Some(estimate) = rows.first().and_then(|r| row_i64(r, "num_rows")) {
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
        let (sql, ordered) = translate_placeholders(sql, params, ParamStyle::ColonNamed)?;
        self.with_conn(move |conn| Self::run_query(conn, &sql, ordered)).await
    }
}
