//! Database connection and introspection endpoints

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use utoipa::ToSchema;

use crate::AppState;
use crate::models::connection::{
    ConnectionSpec, CredentialRef, DatabaseEngine, SchemaFilter, SourceTier,
};
use crate::models::metadata::{ColumnInfo, IndexInfo};
use crate::utils::{ApiError, ApiResult, ensure_safe_identifier};

use super::owner_from_headers;

/// Connection view without secrets
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionResponse {
    pub name: String,
    pub engine: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    /// Credential strategy: "none", "env:VAR", or "session"
    pub credential: String,
    pub allowed_schemas: Option<Vec<String>>,
    pub predefined_schemas: HashMap<String, SchemaFilter>,
    pub tier: SourceTier,
}

impl From<ConnectionSpec> for ConnectionResponse {
    fn from(spec: ConnectionSpec) -> Self {
        let credential = match &spec.credentials {
            CredentialRef::None => "none".to_string(),
            CredentialRef::Inline { .. } => "session".to_string(),
            CredentialRef::Env { var } => format!("env:{}", var),
            CredentialRef::SessionCache => "session".to_string(),
        };
        Self {
            name: spec.name,
            engine: spec.engine.as_str().to_string(),
            host: spec.host,
            port: spec.port,
            database: spec.database,
            username: spec.username,
            credential,
            allowed_schemas: spec.allowed_schemas,
            predefined_schemas: spec.predefined_schemas,
            tier: spec.tier,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateConnectionRequest {
    pub name: String,
    pub engine: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    /// Inline secret; kept in the session cache, never persisted
    pub password: Option<String>,
    /// Environment variable holding the secret
    pub password_env: Option<String>,
    pub allowed_schemas: Option<Vec<String>>,
    #[serde(default)]
    pub predefined_schemas: HashMap<String, SchemaFilter>,
}

impl CreateConnectionRequest {
    fn into_spec(self, owner: &str) -> ApiResult<ConnectionSpec> {
        ensure_safe_identifier(&self.name)?;
        let engine = DatabaseEngine::parse(&self.engine)
            .ok_or_else(|| ApiError::validation_error(format!("unknown engine '{}'", self.engine)))?;
        let credentials = if let Some(password) = self.password {
            CredentialRef::Inline { secret: password }
        } else if let Some(var) = self.password_env {
            CredentialRef::Env { var }
        } else {
            CredentialRef::None
        };
        Ok(ConnectionSpec {
            name: self.name,
            engine,
            host: self.host,
            port: self.port,
            database: self.database,
            username: self.username,
            credentials,
            allowed_schemas: self.allowed_schemas,
            predefined_schemas: self.predefined_schemas,
            tier: SourceTier::User,
            owner: owner.to_string(),
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionTestResponse {
    pub success: bool,
    pub message: String,
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SchemaInfo {
    pub name: String,
    pub table_count: usize,
    pub tables: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SchemaListResponse {
    pub schemas: Vec<SchemaInfo>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TableListResponse {
    pub schema_name: String,
    pub tables: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TableInfoResponse {
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub row_count: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PredefinedSchemasResponse {
    pub connection: String,
    pub predefined_schemas: HashMap<String, SchemaFilter>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PredefinedSchemasRequest {
    pub predefined_schemas: HashMap<String, SchemaFilter>,
}

// List connections visible to the caller
#[utoipa::path(
    get,
    path = "/api/databases",
    responses((status = 200, description = "Connections", body = Vec<ConnectionResponse>)),
    tag = "Databases"
)]
pub async fn list_connections(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ConnectionResponse>>> {
    let owner = owner_from_headers(&headers);
    let specs = state.registry.list(&owner).await?;
    Ok(Json(specs.into_iter().map(ConnectionResponse::from).collect()))
}

// Create a user-tier connection
#[utoipa::path(
    post,
    path = "/api/databases",
    request_body = CreateConnectionRequest,
    responses(
        (status = 200, description = "Connection created", body = ConnectionResponse),
        (status = 400, description = "Invalid request")
    ),
    tag = "Databases"
)]
pub async fn create_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateConnectionRequest>,
) -> ApiResult<Json<ConnectionResponse>> {
    let owner = owner_from_headers(&headers);
    let spec = request.into_spec(&owner)?;
    let stored = state.registry.add_user_connection(&owner, spec).await?;
    Ok(Json(stored.into()))
}

// Get one connection
#[utoipa::path(
    get,
    path = "/api/databases/{name}",
    params(("name" = String, Path, description = "Connection name")),
    responses(
        (status = 200, description = "Connection", body = ConnectionResponse),
        (status = 404, description = "Unknown connection")
    ),
    tag = "Databases"
)]
pub async fn get_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> ApiResult<Json<ConnectionResponse>> {
    let owner = owner_from_headers(&headers);
    let spec = state.registry.get_spec(&owner, &name).await?;
    Ok(Json(spec.into()))
}

// Update a user-tier connection
#[utoipa::path(
    put,
    path = "/api/databases/{name}",
    request_body = CreateConnectionRequest,
    params(("name" = String, Path, description = "Connection name")),
    responses(
        (status = 200, description = "Connection updated", body = ConnectionResponse),
        (status = 404, description = "Unknown connection")
    ),
    tag = "Databases"
)]
pub async fn update_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(request): Json<CreateConnectionRequest>,
) -> ApiResult<Json<ConnectionResponse>> {
    let owner = owner_from_headers(&headers);
    if request.name != name {
        return Err(ApiError::validation_error("connection name does not match the path"));
    }
    let spec = request.into_spec(&owner)?;
    let stored = state.registry.update_user_connection(&owner, spec).await?;
    Ok(Json(stored.into()))
}

// Delete a user-tier connection
#[utoipa::path(
    delete,
    path = "/api/databases/{name}",
    params(("name" = String, Path, description = "Connection name")),
    responses(
        (status = 200, description = "Connection deleted"),
        (status = 404, description = "Unknown connection")
    ),
    tag = "Databases"
)]
pub async fn delete_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let owner = owner_from_headers(&headers);
    state.registry.delete_user_connection(&owner, &name).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

// Probe connectivity and measure latency
#[utoipa::path(
    post,
    path = "/api/databases/{name}/test",
    params(("name" = String, Path, description = "Connection name")),
    responses((status = 200, description = "Probe outcome", body = ConnectionTestResponse)),
    tag = "Databases"
)]
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> ApiResult<Json<ConnectionTestResponse>> {
    let owner = owner_from_headers(&headers);
    let start = Instant::now();

    let outcome = match state.registry.resolve(&owner, &name).await {
        Ok(handler) => handler.ping().await,
        Err(e) => Err(e),
    };
    let latency_ms = start.elapsed().as_millis() as i64;

    match outcome {
        Ok(()) => Ok(Json(ConnectionTestResponse {
            success: true,
            message: "Connection successful".to_string(),
            latency_ms: Some(latency_ms),
        })),
        Err(e @ ApiError::NotFound(_)) => Err(e),
        Err(e) => Ok(Json(ConnectionTestResponse {
            success: false,
            message: format!("Connection failed: {}", e),
            latency_ms: Some(latency_ms),
        })),
    }
}

// List schemas with their filtered table lists
#[utoipa::path(
    get,
    path = "/api/databases/{name}/schemas",
    params(("name" = String, Path, description = "Connection name")),
    responses((status = 200, description = "Schemas", body = SchemaListResponse)),
    tag = "Databases"
)]
pub async fn list_schemas(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> ApiResult<Json<SchemaListResponse>> {
    let owner = owner_from_headers(&headers);
    let spec = state.registry.get_spec(&owner, &name).await?;
    let handler = state.registry.resolve(&owner, &name).await?;

    let mut schemas = Vec::new();
    for schema_name in handler.list_schemas().await? {
        if !spec.schema_allowed(&schema_name) {
            continue;
        }
        let raw = handler.list_tables(&schema_name).await.unwrap_or_default();
        let tables = match spec.schema_filter(&schema_name) {
            Some(filter) => filter.apply(&raw),
            None => raw,
        };
        schemas.push(SchemaInfo {
            name: schema_name,
            table_count: tables.len(),
            tables,
        });
    }

    Ok(Json(SchemaListResponse { schemas }))
}

// List tables of one schema, filter applied
#[utoipa::path(
    get,
    path = "/api/databases/{name}/schemas/{schema}/tables",
    params(
        ("name" = String, Path, description = "Connection name"),
        ("schema" = String, Path, description = "Schema name")
    ),
    responses((status = 200, description = "Tables", body = TableListResponse)),
    tag = "Databases"
)]
pub async fn list_tables(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((name, schema)): Path<(String, String)>,
) -> ApiResult<Json<TableListResponse>> {
    ensure_safe_identifier(&schema)?;
    let owner = owner_from_headers(&headers);
    let spec = state.registry.get_spec(&owner, &name).await?;
    if !spec.schema_allowed(&schema) {
        return Err(ApiError::not_found(format!("schema '{}'", schema)));
    }

    let handler = state.registry.resolve(&owner, &name).await?;
    let raw = handler.list_tables(&schema).await?;
    let tables = match spec.schema_filter(&schema) {
        Some(filter) => filter.apply(&raw),
        None => raw,
    };

    Ok(Json(TableListResponse { schema_name: schema, tables }))
}

// Declared schema, indexes, and row-count estimate for one table
#[utoipa::path(
    get,
    path = "/api/databases/{name}/tables/{schema}/{table}",
    params(
        ("name" = String, Path, description = "Connection name"),
        ("schema" = String, Path, description = "Schema name"),
        ("table" = String, Path, description = "Table name")
    ),
    responses(
        (status = 200, description = "Table info", body = TableInfoResponse),
        (status = 404, description = "Unknown table")
    ),
    tag = "Databases"
)]
pub async fn get_table_info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((name, schema, table)): Path<(String, String, String)>,
) -> ApiResult<Json<TableInfoResponse>> {
    ensure_safe_identifier(&schema)?;
    ensure_safe_identifier(&table)?;
    let owner = owner_from_headers(&headers);
    let handler = state.registry.resolve(&owner, &name).await?;

    let table_schema = handler.table_schema(&schema, &table).await?;
    if table_schema.is_empty() {
        return Err(ApiError::not_found(format!("table {}.{}", schema, table)));
    }
    let indexes = handler.table_indexes(&schema, &table).await.unwrap_or_default();
    let row_count = handler.row_count(&schema, &table, true).await.unwrap_or(None);

    Ok(Json(TableInfoResponse {
        schema_name: schema,
        table_name: table,
        columns: table_schema.columns,
        indexes,
        row_count,
    }))
}

// Whole predefined-schema filter map
#[utoipa::path(
    get,
    path = "/api/databases/{name}/predefined-schemas",
    params(("name" = String, Path, description = "Connection name")),
    responses((status = 200, description = "Filter map", body = PredefinedSchemasResponse)),
    tag = "Databases"
)]
pub async fn get_predefined_schemas(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> ApiResult<Json<PredefinedSchemasResponse>> {
    let owner = owner_from_headers(&headers);
    let spec = state.registry.get_spec(&owner, &name).await?;
    Ok(Json(PredefinedSchemasResponse {
        connection: name,
        predefined_schemas: spec.predefined_schemas,
    }))
}

// Replace the whole predefined-schema filter map
#[utoipa::path(
    put,
    path = "/api/databases/{name}/predefined-schemas",
    request_body = PredefinedSchemasRequest,
    params(("name" = String, Path, description = "Connection name")),
    responses(
        (status = 200, description = "Filter map replaced", body = PredefinedSchemasResponse),
        (status = 404, description = "Unknown user connection")
    ),
    tag = "Databases"
)]
pub async fn put_predefined_schemas(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(request): Json<PredefinedSchemasRequest>,
) -> ApiResult<Json<PredefinedSchemasResponse>> {
    let owner = owner_from_headers(&headers);
    let spec = state
        .registry
        .put_predefined_schemas(&owner, &name, request.predefined_schemas)
        .await?;
    Ok(Json(PredefinedSchemasResponse {
        connection: name,
        predefined_schemas: spec.predefined_schemas,
    }))
}

// Insert or replace a single schema filter
#[utoipa::path(
    post,
    path = "/api/databases/{name}/predefined-schemas/{schema}",
    request_body = SchemaFilter,
    params(
        ("name" = String, Path, description = "Connection name"),
        ("schema" = String, Path, description = "Schema name")
    ),
    responses(
        (status = 200, description = "Filter stored", body = PredefinedSchemasResponse),
        (status = 404, description = "Unknown user connection")
    ),
    tag = "Databases"
)]
pub async fn set_schema_filter(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((name, schema)): Path<(String, String)>,
    Json(filter): Json<SchemaFilter>,
) -> ApiResult<Json<PredefinedSchemasResponse>> {
    ensure_safe_identifier(&schema)?;
    let owner = owner_from_headers(&headers);
    let spec = state.registry.set_schema_filter(&owner, &name, &schema, filter).await?;
    Ok(Json(PredefinedSchemasResponse {
        connection: name,
        predefined_schemas: spec.predefined_schemas,
    }))
}

// Remove a single schema filter
#[utoipa::path(
    delete,
    path = "/api/databases/{name}/predefined-schemas/{schema}",
    params(
        ("name" = String, Path, description = "Connection name"),
        ("schema" = String, Path, description = "Schema name")
    ),
    responses(
        (status = 200, description = "Filter removed", body = PredefinedSchemasResponse),
        (status = 404, description = "Unknown filter")
    ),
    tag = "Databases"
)]
pub async fn delete_schema_filter(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((name, schema)): Path<(String, String)>,
) -> ApiResult<Json<PredefinedSchemasResponse>> {
    let owner = owner_from_headers(&headers);
    let spec = state.registry.remove_schema_filter(&owner, &name, &schema).await?;
    Ok(Json(PredefinedSchemasResponse {
        connection: name,
        predefined_schemas: spec.predefined_schemas,
    }))
}
