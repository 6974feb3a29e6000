// BigQuery handler speaking the REST API (jobs.query, datasets, tables)
//
// Long-lived client; partition-aware sampling with a dry-run cost gate in
// front of every generated sampling query.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::models::connection::{ConnectionSpec, DatabaseEngine};
use crate::models::metadata::{
    ColumnInfo, Constraints, IndexInfo, PartitionEntry, PartitionInfo, SampleRow, SamplingMethod,
    TableSchema, TableSample,
};
use crate::utils::{ApiError, ApiResult};

use super::sampling::assemble;
use super::{
    CostCheck, DatabaseHandler, ParamStyle, SampleSpec, SqlValue, check_identifiers, row_i64,
    row_str, translate_placeholders,
};

const DEFAULT_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
/// jobs.query wait budget; queries still running after this surface as errors
const QUERY_TIMEOUT_MS: i64 = 30_000;

pub struct BigQueryHandler {
    http: Client,
    api_base: String,
    project: String,
    token: String,
    max_scan_bytes: u64,
}

impl BigQueryHandler {
    pub fn new(spec: &ConnectionSpec, secret: Option<String>, max_scan_bytes: u64) -> ApiResult<Self> {
        let project = spec
            .database
            .clone()
            .ok_or_else(|| ApiError::validation_error("bigquery connection requires a project id"))?;
        let token = secret.ok_or_else(|| ApiError::auth_missing(spec.name.clone()))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ApiError::internal_error(format!("http client: {}", e)))?;

        // spec.host overrides the endpoint (emulators, private service connect)
        let api_base = spec
            .host
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self { http, api_base, project, token, max_scan_bytes })
    }

    fn qualified(&self, dataset: &str, table: &str) -> String {
        format!("`{}.{}.{}`", self.project, dataset, table)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ApiError::connection_failed(format!("bigquery: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(ApiError::connection_failed(format!(
                "bigquery API error {}: {}",
                status, body
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::internal_error(format!("bigquery response parse: {}", e)))
    }

    async fn run_query(&self, request: &QueryRequest) -> ApiResult<QueryResponse> {
        let url = format!("{}/projects/{}/queries", self.api_base, self.project);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::connection_failed(format!("bigquery: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(ApiError::internal_error(format!("bigquery query error {}: {}", status, body)));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| ApiError::internal_error(format!("bigquery response parse: {}", e)))?;

        if parsed.job_complete == Some(false) {
            return Err(ApiError::internal_error(
                "bigquery query did not complete within the wait budget".to_string(),
            ));
        }
        Ok(parsed)
    }

    fn query_request(sql: &str, params: &[(&str, SqlValue)], dry_run: bool) -> ApiResult<QueryRequest> {
        let (sql, ordered) = translate_placeholders(sql, params, ParamStyle::AtNamed)?;
        let query_parameters: Vec<QueryParameter> = ordered
            .iter()
            .map(|(name, value)| {
                let (kind, rendered) = match value {
                    SqlValue::Text(s) => ("STRING", s.clone()),
                    SqlValue::Int(i) => ("INT64", i.to_string()),
                    SqlValue::Float(f) => ("FLOAT64", f.to_string()),
                    SqlValue::Bool(b) => ("BOOL", b.to_string()),
                    SqlValue::Null => ("STRING", String::new()),
                };
                QueryParameter {
                    name: name.clone(),
                    parameter_type: ParameterType { kind: kind.to_string() },
                    parameter_value: ParameterValue { value: rendered },
                }
            })
            .collect();

        Ok(QueryRequest {
            query: sql,
            use_legacy_sql: false,
            dry_run,
            timeout_ms: QUERY_TIMEOUT_MS,
            parameter_mode: if query_parameters.is_empty() { None } else { Some("NAMED".into()) },
            query_parameters,
        })
    }

    fn rows_to_json(response: &QueryResponse) -> Vec<SampleRow> {
        let Some(schema) = &response.schema else { return Vec::new() };
        let Some(tuples) = &response.rows else { return Vec::new() };

        tuples
            .iter()
            .map(|tuple| {
                let mut obj = SampleRow::new();
                for (field, cell) in schema.fields.iter().zip(tuple.f.iter()) {
                    obj.insert(field.name.clone(), Self::typed_cell(&field.kind, &cell.v));
                }
                obj
            })
            .collect()
    }

    /// The JSON API returns every scalar as a string; re-type from the schema
    fn typed_cell(kind: &str, raw: &Value) -> Value {
        let Value::String(text) = raw else {
            return raw.clone();
        };
        match kind {
            "INTEGER" | "INT64" => text.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => text
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            "BOOLEAN" | "BOOL" => match text.as_str() {
                "true" => Value::from(true),
                "false" => Value::from(false),
                _ => Value::Null,
            },
            _ => Value::from(text.clone()),
        }
    }

    fn partition_predicate(column: &str, index: usize, partition_id: &str) -> (String, SqlValue) {
        // Daily partition decorators are YYYYMMDD
        if partition_id.len() == 8 && partition_id.chars().all(|c| c.is_ascii_digit()) {
            let date = format!(
                "{}-{}-{}",
                &partition_id[0..4],
                &partition_id[4..6],
                &partition_id[6..8]
            );
            (
                format!("DATE({}) = CAST(:p{} AS DATE)", column, index),
                SqlValue::Text(date),
            )
        } else {
            (
                format!("CAST({} AS STRING) = :p{}", column, index),
                SqlValue::Text(partition_id.to_string()),
            )
        }
    }
}

#[async_trait]
impl DatabaseHandler for BigQueryHandler {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Bigquery
    }

    fn table_ref(&self, schema: &str, table: &str) -> String {
        self.qualified(schema, table)
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident)
    }

    async fn ping(&self) -> ApiResult<()> {
        let request = Self::query_request("SELECT 1", &[], false)?;
        self.run_query(&request).await.map(|_| ())
    }

    async fn list_schemas(&self) -> ApiResult<Vec<String>> {
        let list: DatasetList = self
            .get_json(&format!("/projects/{}/datasets?maxResults=1000", self.project))
            .await?;
        Ok(list
            .datasets
            .unwrap_or_default()
            .into_iter()
            .map(|d| d.dataset_reference.dataset_id)
            .collect())
    }

    async fn list_tables(&self, schema: &str) -> ApiResult<Vec<String>> {
        check_identifiers([schema])?;
        let list: TableList = self
            .get_json(&format!(
                "/projects/{}/datasets/{}/tables?maxResults=1000",
                self.project, schema
            ))
            .await?;
        Ok(list
            .tables
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.table_reference.table_id)
            .collect())
    }

    async fn table_schema(&self, schema: &str, table: &str) -> ApiResult<TableSchema> {
        check_identifiers([schema, table])?;
        let meta: TableMeta = self
            .get_json(&format!(
                "/projects/{}/datasets/{}/tables/{}",
                self.project, schema, table
            ))
            .await?;

        let columns = meta
            .schema
            .map(|s| s.fields)
            .unwrap_or_default()
            .into_iter()
            .map(|field| {
                let mut info = ColumnInfo::new(field.name, field.kind);
                info.is_nullable = field.mode.as_deref() != Some("REQUIRED");
                info.comment = field.description.filter(|d| !d.is_empty());
                info.numeric_precision = field.precision.and_then(|p| p.parse().ok());
                info.numeric_scale = field.scale.and_then(|s| s.parse().ok());
                info.character_maximum_length = field.max_length.and_then(|l| l.parse().ok());
                info
            })
            .collect();

        Ok(TableSchema { columns })
    }

    async fn table_indexes(&self, _schema: &str, _table: &str) -> ApiResult<Vec<IndexInfo>> {
        // BigQuery has no secondary indexes; clustering is reported separately
        Ok(Vec::new())
    }

    async fn table_constraints(&self, _schema: &str, _table: &str) -> ApiResult<Constraints> {
        // Primary/foreign keys are unenforced metadata in BigQuery; skip
        Ok(Constraints::default())
    }

    async fn row_count(&self, schema: &str, table: &str, estimate: bool) -> ApiResult<Option<i64>> {
        check_identifiers([schema, table])?;
        if estimate {
            let meta: TableMeta = self
                .get_json(&format!(
                    "/projects/{}/datasets/{}/tables/{}",
                    self.project, schema, table
                ))
                .await?;
            if let Some(rows) = meta.num_rows.and_then(|n| n.parse::<i64>().ok()) {
                return Ok(Some(rows));
            }
        }
        let sql = format!("SELECT COUNT(*) AS count FROM {}", self.qualified(schema, table));
        let rows = self.fetch_all(&sql, &[]).await?;
        Ok(rows.first().and_then(|r| row_i64(r, "count")))
    }

    async fn partition_info(&self, schema: &str, table: &str) -> ApiResult<Option<PartitionInfo>> {
        check_identifiers([schema, table])?;
        let meta: TableMeta = self
            .get_json(&format!(
                "/projects/{}/datasets/{}/tables/{}",
                self.project, schema, table
            ))
            .await?;

        let mut info = PartitionInfo::default();
        if let Some(clustering) = meta.clustering {
            info.clustering_fields = clustering.fields;
        }

        let Some(partitioning) = meta.time_partitioning else {
            if info.clustering_fields.is_empty() {
                return Ok(None);
            }
            return Ok(Some(info));
        };

        info.is_partitioned = true;
        info.partition_type = Some(partitioning.kind);
        info.partition_column = partitioning.field;

        // Newest first, bounded probe
        let sql = format!(
            "SELECT partition_id, total_rows, total_logical_bytes \
             FROM `{}.{}.INFORMATION_SCHEMA.PARTITIONS` \
             WHERE table_name = :table_name AND partition_id IS NOT NULL \
               AND partition_id != '__NULL__' \
             ORDER BY partition_id DESC LIMIT 100",
            self.project, schema
        );
        match self
            .fetch_all(&sql, &[("table_name", SqlValue::Text(table.to_string()))])
            .await
        {
            Ok(rows) => {
                info.available_partitions = rows
                    .iter()
                    .filter_map(|r| {
                        Some(PartitionEntry {
                            partition_id: row_str(r, "partition_id")?,
                            row_count: row_i64(r, "total_rows").unwrap_or(0),
                            byte_size: row_i64(r, "total_logical_bytes").unwrap_or(0),
                        })
                    })
                    .collect();
            }
            Err(e) => {
                tracing::warn!("Could not list partitions for {}.{}: {}", schema, table, e);
            }
        }

        Ok(Some(info))
    }

    async fn check_cost(&self, sql: &str, params: &[(&str, SqlValue)]) -> ApiResult<CostCheck> {
        let request = Self::query_request(sql, params, true)?;
        let response = self.run_query(&request).await?;
        let bytes = response
            .total_bytes_processed
            .as_deref()
            .and_then(|b| b.parse::<i64>().ok())
            .unwrap_or(0);

        if bytes as u64 > self.max_scan_bytes {
            Ok(CostCheck {
                safe: false,
                rationale: format!(
                    "query would process {:.2} GiB, above the {:.2} GiB ceiling",
                    bytes as f64 / (1 << 30) as f64,
                    self.max_scan_bytes as f64 / (1 << 30) as f64
                ),
                estimated_bytes: Some(bytes),
            })
        } else {
            Ok(CostCheck {
                safe: true,
                rationale: format!("dry run estimates {} bytes processed", bytes),
                estimated_bytes: Some(bytes),
            })
        }
    }

    /// Partition-aware sampling: newest non-empty partitions first, dry-run
    /// cost gate before execution.
    async fn sample(&self, schema: &str, table: &str, spec: &SampleSpec) -> ApiResult<TableSample> {
        check_identifiers([schema, table])?;
        let table_schema = self.table_schema(schema, table).await?;
        let columns = table_schema.column_names();
        let target = spec.sample_size.saturating_mul(spec.num_samples).max(1);

        let partition_info = self.partition_info(schema, table).await?.unwrap_or_default();

        let (sql, params): (String, Vec<(String, SqlValue)>) = if !partition_info.is_partitioned {
            let percent = (target as f64 / 1000.0).clamp(1.0, 10.0);
            (
                format!(
                    "SELECT * FROM {} TABLESAMPLE SYSTEM ({} PERCENT) LIMIT {}",
                    self.qualified(schema, table),
                    percent as u32,
                    target
                ),
                Vec::new(),
            )
        } else {
            let usable: Vec<&PartitionEntry> = partition_info
                .available_partitions
                .iter()
                .take(spec.max_partitions)
                .filter(|p| p.row_count > 0)
                .take(spec.num_samples)
                .collect();

            if usable.is_empty() {
                tracing::warn!("No non-empty partitions found for {}.{}", schema, table);
                return Ok(TableSample::empty(columns, SamplingMethod::PartitionAware));
            }

            match &partition_info.partition_column {
                Some(column) => {
                    check_identifiers([column.as_str()])?;
                    let mut predicates = Vec::new();
                    let mut params = Vec::new();
                    for (idx, partition) in usable.iter().enumerate() {
                        let (predicate, value) =
                            Self::partition_predicate(column, idx, &partition.partition_id);
                        predicates.push(predicate);
                        params.push((format!("p{}", idx), value));
                    }
                    (
                        format!(
                            "SELECT * FROM {} WHERE {} LIMIT {}",
                            self.qualified(schema, table),
                            predicates.join(" OR "),
                            target
                        ),
                        params,
                    )
                }
                None => {
                    // Ingestion-time partitioning: use partition decorators
                    let selects: Vec<String> = usable
                        .iter()
                        .filter(|p| p.partition_id.chars().all(|c| c.is_ascii_digit()))
                        .map(|p| {
                            format!(
                                "SELECT * FROM `{}.{}.{}${}` LIMIT {}",
                                self.project, schema, table, p.partition_id, spec.sample_size
                            )
                        })
                        .collect();
                    (selects.join(" UNION ALL "), Vec::new())
                }
            }
        };

        if sql.is_empty() {
            return Ok(TableSample::empty(columns, SamplingMethod::PartitionAware));
        }

        // The dry run must see the same bindings as the real query
        let borrowed: Vec<(&str, SqlValue)> =
            params.iter().map(|(n, v)| (n.as_str(), v.clone())).collect();

        let cost = self.check_cost(&sql, &borrowed).await?;
        if !cost.safe {
            return Err(ApiError::cost_exceeded(cost.rationale));
        }

        let rows = self.fetch_all(&sql, &borrowed).await?;

        let method = if partition_info.is_partitioned {
            SamplingMethod::PartitionAware
        } else {
            SamplingMethod::RandomOffset
        };
        Ok(assemble(columns, rows, method))
    }

    async fn fetch_all(&self, sql: &str, params: &[(&str, SqlValue)]) -> ApiResult<Vec<SampleRow>> {
        let request = Self::query_request(sql, params, false)?;
        let response = self.run_query(&request).await?;
        Ok(Self::rows_to_json(&response))
    }
}

// ============================================================================
// BigQuery REST wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    query: String,
    use_legacy_sql: bool,
    dry_run: bool,
    timeout_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameter_mode: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    query_parameters: Vec<QueryParameter>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryParameter {
    name: String,
    parameter_type: ParameterType,
    parameter_value: ParameterValue,
}

#[derive(Debug, Serialize)]
struct ParameterType {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize)]
struct ParameterValue {
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    schema: Option<SchemaDto>,
    rows: Option<Vec<TupleDto>>,
    total_bytes_processed: Option<String>,
    job_complete: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SchemaDto {
    #[serde(default)]
    fields: Vec<FieldDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldDto {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    mode: Option<String>,
    description: Option<String>,
    precision: Option<String>,
    scale: Option<String>,
    max_length: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TupleDto {
    #[serde(default)]
    f: Vec<CellDto>,
}

#[derive(Debug, Deserialize)]
struct CellDto {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableMeta {
    schema: Option<SchemaDto>,
    time_partitioning: Option<TimePartitioningDto>,
    clustering: Option<ClusteringDto>,
    num_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimePartitioningDto {
    #[serde(rename = "type")]
    kind: String,
    field: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClusteringDto {
    #[serde(default)]
    fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetList {
    datasets: Option<Vec<DatasetEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetEntry {
    dataset_reference: DatasetReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    dataset_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    tables: Option<Vec<TableEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableEntry {
    table_reference: TableReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    table_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_partition_ids_bind_as_cast_dates() {
        let (predicate, value) = BigQueryHandler::partition_predicate("event_date", 0, "20240103");
        assert_eq!(predicate, "DATE(event_date) = CAST(:p0 AS DATE)");
        assert_eq!(value, SqlValue::Text("2024-01-03".to_string()));
    }

    #[test]
    fn other_partition_ids_bind_as_strings() {
        let (predicate, value) = BigQueryHandler::partition_predicate("region", 1, "emea");
        assert_eq!(predicate, "CAST(region AS STRING) = :p1");
        assert_eq!(value, SqlValue::Text("emea".to_string()));
    }

    #[test]
    fn dry_run_request_carries_the_partition_bindings() {
        // Same shape sample() builds for a column-partitioned table
        let partition_ids = ["20240103", "20240102", "20240101"];
        let mut predicates = Vec::new();
        let mut params = Vec::new();
        for (idx, partition_id) in partition_ids.iter().enumerate() {
            let (predicate, value) =
                BigQueryHandler::partition_predicate("event_date", idx, partition_id);
            predicates.push(predicate);
            params.push((format!("p{}", idx), value));
        }
        let sql = format!(
            "SELECT * FROM `proj.ds.events` WHERE {} LIMIT 50",
            predicates.join(" OR ")
        );
        let borrowed: Vec<(&str, SqlValue)> =
            params.iter().map(|(n, v)| (n.as_str(), v.clone())).collect();

        let request = BigQueryHandler::query_request(&sql, &borrowed, true).unwrap();

        assert!(request.dry_run);
        assert!(request.query.contains("@p0"));
        assert!(request.query.contains("@p2"));
        assert!(!request.query.contains(":p0"));
        assert_eq!(request.parameter_mode.as_deref(), Some("NAMED"));
        assert_eq!(request.query_parameters.len(), 3);
        assert_eq!(request.query_parameters[0].name, "p0");
        assert_eq!(request.query_parameters[0].parameter_value.value, "2024-01-03");
    }

    #[test]
    fn unbound_placeholders_are_an_error() {
        let result = BigQueryHandler::query_request(
            "SELECT * FROM t WHERE DATE(event_date) = CAST(:p0 AS DATE)",
            &[],
            true,
        );
        assert!(result.is_err());
    }

    #[test]
    fn cells_retype_from_the_schema() {
        use serde_json::Value;
        assert_eq!(BigQueryHandler::typed_cell("INT64", &Value::from("42")), Value::from(42));
        assert_eq!(BigQueryHandler::typed_cell("BOOL", &Value::from("true")), Value::from(true));
        assert_eq!(
            BigQueryHandler::typed_cell("FLOAT64", &Value::from("1.5")),
            Value::from(1.5)
        );
        assert_eq!(
            BigQueryHandler::typed_cell("STRING", &Value::from("abc")),
            Value::from("abc")
        );
        assert_eq!(BigQueryHandler::typed_cell("INT64", &Value::Null), Value::Null);
    }
}
