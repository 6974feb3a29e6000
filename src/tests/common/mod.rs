// Common test utilities and helpers

use chrono::Utc;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, FileConnection};
use crate::models::metadata::{
    ColumnClassification, ColumnMetadata, Constraints, DataLifecycle, DefinitionSource,
    MetadataDocument, OptionalSections, ProcessingStats, TableInsights,
};
use crate::AppState;

/// Create an in-memory SQLite database for the application state
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(3))
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Seed a small SQLite source database on disk and return its path
pub async fn seed_source_db(dir: &Path) -> String {
    let path = dir.join("source.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let pool = SqlitePool::connect(&url).await.expect("open source db");

    sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
        sqlx::query("INSERT INTO t (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(&pool)
            .await
            .unwrap();
    }

    sqlx::query("CREATE TABLE empty_t (id INTEGER, label TEXT)")
        .execute(&pool)
        .await
        .unwrap();

    pool.close().await;
    path.display().to_string()
}

/// Test configuration: file-tier sqlite connection, LLM disabled, storage
/// under the given directory.
pub fn test_config(source_db_path: &str, storage_dir: &Path) -> Config {
    let mut config = Config::default();
    config.llm.enabled = false;
    config.retry.initial_wait_ms = 1;
    config.retry.max_wait_ms = 2;
    config.storage.metadata_dir = storage_dir.display().to_string();
    config.connections.insert(
        "testdb".to_string(),
        FileConnection {
            engine: "sqlite".to_string(),
            host: None,
            port: None,
            database: Some(source_db_path.to_string()),
            username: None,
            password: None,
            password_env: None,
            allowed_schemas: None,
            predefined_schemas: Default::default(),
        },
    );
    config
}

/// Full application state against the seeded source database
pub async fn create_test_state(source_db_path: &str, storage_dir: &Path) -> Arc<AppState> {
    let config = test_config(source_db_path, storage_dir);
    let pool = create_test_db().await;
    Arc::new(AppState::build(&config, pool).expect("build app state"))
}

/// Minimal but schema-complete metadata document for storage tests
pub fn sample_document(database: &str, schema: &str, table: &str) -> MetadataDocument {
    let mut columns = BTreeMap::new();
    columns.insert(
        "id".to_string(),
        ColumnMetadata {
            name: "id".to_string(),
            data_type: "INTEGER".to_string(),
            is_nullable: false,
            description: "Unique identifier for the record".to_string(),
            original_description: None,
            business_name: "Id".to_string(),
            purpose: "Primary key".to_string(),
            format: "Standard format".to_string(),
            business_rules: Vec::new(),
            definition_source: DefinitionSource::PatternBased,
            classification: ColumnClassification::Numerical,
            statistics: None,
            data_quality: None,
            categorical_values: None,
            numeric_precision: None,
            numeric_scale: None,
            character_maximum_length: None,
        },
    );

    MetadataDocument {
        database_name: database.to_string(),
        schema_name: schema.to_string(),
        table_name: table.to_string(),
        description: "Test table".to_string(),
        columns,
        constraints: Constraints::default(),
        indexes: Vec::new(),
        row_count: Some(3),
        partition_info: None,
        table_insights: TableInsights {
            domain: "Business Data".to_string(),
            category: "Data Table".to_string(),
            description: "Test table".to_string(),
            purpose: "Testing".to_string(),
            usage_patterns: vec!["Data storage and retrieval".to_string()],
            data_lifecycle: DataLifecycle {
                update_frequency: "Unknown".to_string(),
                retention_policy: "Not specified".to_string(),
                archival_strategy: "Not defined".to_string(),
            },
            special_handling: Vec::new(),
            data_quality_recommendations: Vec::new(),
        },
        relationships: None,
        business_rules: None,
        aggregation_rules: None,
        query_rules: None,
        query_examples: None,
        additional_insights: None,
        categorical_definitions: None,
        data_quality: None,
        processing_stats: ProcessingStats {
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            total_duration_ms: 1,
            steps: Vec::new(),
            optional_sections: OptionalSections::none(),
            sampling_method: None,
            total_tokens: 0,
            llm_request_count: 0,
            estimated_cost_usd: 0.0,
        },
        generated_at: Utc::now(),
    }
}
