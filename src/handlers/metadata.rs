//! Metadata generation and job endpoints

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

use crate::AppState;
use crate::models::job::{Job, JobKind, JobSummary};
use crate::models::metadata::{GenerateOptions, MetadataDocument, OptionalSections};
use crate::services::job_manager::JobRequest;
use crate::services::pipeline::RunHooks;
use crate::services::storage::StoredEntry;
use crate::utils::{ApiError, ApiResult, ensure_safe_identifier};

use super::owner_from_headers;

fn default_schema() -> String {
    "public".to_string()
}

fn default_sample_size() -> u32 {
    20
}

fn default_num_samples() -> u32 {
    5
}

fn default_max_partitions() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

/// Request body for metadata generation (sync and async)
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct GenerateMetadataRequest {
    /// Connection name
    pub db_name: String,
    pub table_name: String,
    #[serde(default = "default_schema")]
    pub schema_name: String,

    #[validate(range(min = 1, max = 10000))]
    #[serde(default = "default_sample_size")]
    pub sample_size: u32,
    #[validate(range(min = 1, max = 20))]
    #[serde(default = "default_num_samples")]
    pub num_samples: u32,
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_max_partitions")]
    pub max_partitions: u32,

    // Optional sections - can be disabled to save time and cost
    #[serde(default = "default_true")]
    pub include_relationships: bool,
    #[serde(default = "default_true")]
    pub include_aggregation_rules: bool,
    #[serde(default = "default_true")]
    pub include_query_rules: bool,
    #[serde(default = "default_true")]
    pub include_data_quality: bool,
    #[serde(default = "default_true")]
    pub include_query_examples: bool,
    #[serde(default = "default_true")]
    pub include_additional_insights: bool,
    #[serde(default = "default_true")]
    pub include_business_rules: bool,
    #[serde(default = "default_true")]
    pub include_categorical_definitions: bool,
}

impl GenerateMetadataRequest {
    /// Boundary checks: value ranges plus identifier safety
    pub fn check(&self) -> ApiResult<()> {
        self.validate()
            .map_err(|e| ApiError::validation_error(e.to_string()))?;
        ensure_safe_identifier(&self.db_name)?;
        ensure_safe_identifier(&self.schema_name)?;
        ensure_safe_identifier(&self.table_name)?;
        Ok(())
    }

    pub fn options(&self) -> GenerateOptions {
        GenerateOptions {
            sample_size: self.sample_size as usize,
            num_samples: self.num_samples as usize,
            max_partitions: self.max_partitions as usize,
            sections: OptionalSections {
                relationships: self.include_relationships,
                aggregation_rules: self.include_aggregation_rules,
                query_rules: self.include_query_rules,
                data_quality: self.include_data_quality,
                query_examples: self.include_query_examples,
                additional_insights: self.include_additional_insights,
                business_rules: self.include_business_rules,
                categorical_definitions: self.include_categorical_definitions,
            },
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BackgroundJobResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StoredListResponse {
    pub database_name: String,
    pub entries: Vec<StoredEntry>,
}

// Generate metadata synchronously
#[utoipa::path(
    post,
    path = "/api/metadata/generate",
    request_body = GenerateMetadataRequest,
    responses(
        (status = 200, description = "Metadata document", body = MetadataDocument),
        (status = 400, description = "Validation failure"),
        (status = 404, description = "Connection or table not found")
    ),
    tag = "Metadata"
)]
pub async fn generate_metadata(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<GenerateMetadataRequest>,
) -> ApiResult<Json<MetadataDocument>> {
    request.check()?;
    let owner = owner_from_headers(&headers);

    tracing::info!(
        "Sync metadata generation: {}.{}.{} by {}",
        request.db_name,
        request.schema_name,
        request.table_name,
        owner
    );

    let document = state
        .pipeline
        .generate(
            &owner,
            &request.db_name,
            &request.schema_name,
            &request.table_name,
            &request.options(),
            &RunHooks::default(),
        )
        .await?;

    state.store.write(&document).await?;
    Ok(Json(document))
}

// Generate metadata asynchronously
#[utoipa::path(
    post,
    path = "/api/metadata/generate/async",
    request_body = GenerateMetadataRequest,
    responses(
        (status = 200, description = "Job accepted", body = BackgroundJobResponse),
        (status = 400, description = "Validation failure")
    ),
    tag = "Metadata"
)]
pub async fn generate_metadata_async(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<GenerateMetadataRequest>,
) -> ApiResult<Json<BackgroundJobResponse>> {
    request.check()?;
    let owner = owner_from_headers(&headers);

    let job_id = state.job_manager.submit(
        JobKind::Metadata,
        JobRequest {
            owner,
            database: request.db_name.clone(),
            schema: request.schema_name.clone(),
            table: request.table_name.clone(),
            options: request.options(),
        },
    );

    Ok(Json(BackgroundJobResponse { job_id, status: "pending".to_string() }))
}

// List jobs
#[utoipa::path(
    get,
    path = "/api/metadata/jobs",
    responses(
        (status = 200, description = "All known jobs", body = Vec<JobSummary>)
    ),
    tag = "Jobs"
)]
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<JobSummary>>> {
    Ok(Json(state.job_manager.list()))
}

// Get job status (includes the result document once completed)
#[utoipa::path(
    get,
    path = "/api/metadata/jobs/{job_id}",
    params(("job_id" = String, Path, description = "Job identifier")),
    responses(
        (status = 200, description = "Job record", body = Job),
        (status = 404, description = "Unknown job")
    ),
    tag = "Jobs"
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.job_manager.status(&job_id)?))
}

// Cancel a job
#[utoipa::path(
    delete,
    path = "/api/metadata/jobs/{job_id}",
    params(("job_id" = String, Path, description = "Job identifier")),
    responses(
        (status = 200, description = "Job after cancellation request", body = Job),
        (status = 404, description = "Unknown job")
    ),
    tag = "Jobs"
)]
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.job_manager.cancel(&job_id)?))
}

// Fetch a stored document
#[utoipa::path(
    get,
    path = "/api/metadata/{db}/{schema}/{table}",
    params(
        ("db" = String, Path, description = "Connection name"),
        ("schema" = String, Path, description = "Schema name"),
        ("table" = String, Path, description = "Table name")
    ),
    responses(
        (status = 200, description = "Stored metadata document", body = MetadataDocument),
        (status = 404, description = "No stored document")
    ),
    tag = "Metadata"
)]
pub async fn get_stored_metadata(
    State(state): State<Arc<AppState>>,
    Path((db, schema, table)): Path<(String, String, String)>,
) -> ApiResult<Json<MetadataDocument>> {
    let document = state.store.read(&db, &schema, &table).await?;
    Ok(Json(document))
}

// Store a pre-built document
#[utoipa::path(
    put,
    path = "/api/metadata/{db}/{schema}/{table}",
    request_body = MetadataDocument,
    params(
        ("db" = String, Path, description = "Connection name"),
        ("schema" = String, Path, description = "Schema name"),
        ("table" = String, Path, description = "Table name")
    ),
    responses(
        (status = 200, description = "Document stored", body = MetadataDocument),
        (status = 400, description = "Document identity does not match the path")
    ),
    tag = "Metadata"
)]
pub async fn store_metadata(
    State(state): State<Arc<AppState>>,
    Path((db, schema, table)): Path<(String, String, String)>,
    Json(document): Json<MetadataDocument>,
) -> ApiResult<Json<MetadataDocument>> {
    if document.database_name != db
        || document.schema_name != schema
        || document.table_name != table
    {
        return Err(ApiError::validation_error(
            "document identity does not match the request path",
        ));
    }
    state.store.write(&document).await?;
    Ok(Json(document))
}

// Delete a stored document
#[utoipa::path(
    delete,
    path = "/api/metadata/{db}/{schema}/{table}",
    params(
        ("db" = String, Path, description = "Connection name"),
        ("schema" = String, Path, description = "Schema name"),
        ("table" = String, Path, description = "Table name")
    ),
    responses(
        (status = 200, description = "Document deleted"),
        (status = 404, description = "No stored document")
    ),
    tag = "Metadata"
)]
pub async fn delete_stored_metadata(
    State(state): State<Arc<AppState>>,
    Path((db, schema, table)): Path<(String, String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.delete(&db, &schema, &table).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

// List stored documents for a database
#[utoipa::path(
    get,
    path = "/api/metadata/{db}",
    params(("db" = String, Path, description = "Connection name")),
    responses(
        (status = 200, description = "Stored documents", body = StoredListResponse)
    ),
    tag = "Metadata"
)]
pub async fn list_stored_metadata(
    State(state): State<Arc<AppState>>,
    Path(db): Path<String>,
) -> ApiResult<Json<StoredListResponse>> {
    let entries = state.store.list(&db).await?;
    Ok(Json(StoredListResponse { database_name: db, entries }))
}
