pub mod database;
pub mod metadata;

use axum::http::HeaderMap;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::AppState;

/// Owner scoping comes from the surrounding auth layer; without one, a
/// caller-supplied header keeps connections per-owner.
pub const OWNER_HEADER: &str = "x-owner";
const DEFAULT_OWNER: &str = "default";

pub fn owner_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_OWNER)
        .to_string()
}

/// The full API surface
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Metadata generation
        .route("/api/metadata/generate", post(metadata::generate_metadata))
        .route("/api/metadata/generate/async", post(metadata::generate_metadata_async))
        // Jobs
        .route("/api/metadata/jobs", get(metadata::list_jobs))
        .route(
            "/api/metadata/jobs/:job_id",
            get(metadata::get_job).delete(metadata::cancel_job),
        )
        // Stored documents
        .route("/api/metadata/:db", get(metadata::list_stored_metadata))
        .route(
            "/api/metadata/:db/:schema/:table",
            get(metadata::get_stored_metadata)
                .put(metadata::store_metadata)
                .delete(metadata::delete_stored_metadata),
        )
        // Connections
        .route(
            "/api/databases",
            get(database::list_connections).post(database::create_connection),
        )
        .route(
            "/api/databases/:name",
            get(database::get_connection)
                .put(database::update_connection)
                .delete(database::delete_connection),
        )
        .route("/api/databases/:name/test", post(database::test_connection))
        .route("/api/databases/:name/schemas", get(database::list_schemas))
        .route(
            "/api/databases/:name/schemas/:schema/tables",
            get(database::list_tables),
        )
        .route(
            "/api/databases/:name/tables/:schema/:table",
            get(database::get_table_info),
        )
        .route(
            "/api/databases/:name/predefined-schemas",
            get(database::get_predefined_schemas).put(database::put_predefined_schemas),
        )
        .route(
            "/api/databases/:name/predefined-schemas/:schema",
            post(database::set_schema_filter).delete(database::delete_schema_filter),
        )
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
