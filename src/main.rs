use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use metaforge::config::Config;
use metaforge::services::JobCleanupTask;
use metaforge::utils::ScheduledExecutor;
use metaforge::{AppState, db, handlers};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::metadata::generate_metadata,
        handlers::metadata::generate_metadata_async,
        handlers::metadata::list_jobs,
        handlers::metadata::get_job,
        handlers::metadata::cancel_job,
        handlers::metadata::get_stored_metadata,
        handlers::metadata::store_metadata,
        handlers::metadata::delete_stored_metadata,
        handlers::metadata::list_stored_metadata,

        handlers::database::list_connections,
        handlers::database::create_connection,
        handlers::database::get_connection,
        handlers::database::update_connection,
        handlers::database::delete_connection,
        handlers::database::test_connection,
        handlers::database::list_schemas,
        handlers::database::list_tables,
        handlers::database::get_table_info,
        handlers::database::get_predefined_schemas,
        handlers::database::put_predefined_schemas,
        handlers::database::set_schema_filter,
        handlers::database::delete_schema_filter,
    ),
    components(
        schemas(
            handlers::metadata::GenerateMetadataRequest,
            handlers::metadata::BackgroundJobResponse,
            handlers::metadata::StoredListResponse,
            handlers::database::ConnectionResponse,
            handlers::database::CreateConnectionRequest,
            handlers::database::ConnectionTestResponse,
            handlers::database::SchemaInfo,
            handlers::database::SchemaListResponse,
            handlers::database::TableListResponse,
            handlers::database::TableInfoResponse,
            handlers::database::PredefinedSchemasResponse,
            handlers::database::PredefinedSchemasRequest,
            metaforge::models::MetadataDocument,
            metaforge::models::ColumnMetadata,
            metaforge::models::ColumnInfo,
            metaforge::models::ColumnClassification,
            metaforge::models::DefinitionSource,
            metaforge::models::NumericStats,
            metaforge::models::QualityMetrics,
            metaforge::models::Constraints,
            metaforge::models::ForeignKey,
            metaforge::models::UniqueConstraint,
            metaforge::models::CheckConstraint,
            metaforge::models::IndexInfo,
            metaforge::models::PartitionInfo,
            metaforge::models::PartitionEntry,
            metaforge::models::TableInsights,
            metaforge::models::DataLifecycle,
            metaforge::models::OptionalSections,
            metaforge::models::ProcessingStats,
            metaforge::models::StepStat,
            metaforge::models::SamplingMethod,
            metaforge::models::TableDataQuality,
            metaforge::models::SchemaFilter,
            metaforge::models::SourceTier,
            metaforge::models::Job,
            metaforge::models::JobSummary,
            metaforge::models::JobKind,
            metaforge::models::JobState,
            metaforge::services::storage::StoredEntry,
        )
    ),
    tags(
        (name = "Metadata", description = "Metadata generation and stored documents"),
        (name = "Jobs", description = "Asynchronous generation jobs"),
        (name = "Databases", description = "Connections, schemas, and table introspection"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("metaforge.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
        run(config).await
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
        run(config).await
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Metaforge starting up");

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Application database ready");

    let state = Arc::new(AppState::build(&config, pool)?);
    tracing::info!(
        "LLM enrichment {}",
        if state.gateway.is_available() { "enabled" } else { "disabled (fallbacks only)" }
    );

    // Periodic cleanup of finished jobs
    let cleanup = ScheduledExecutor::new(
        "job-cleanup",
        Duration::from_secs(config.jobs.cleanup_interval_secs.max(1)),
    );
    let cleanup_shutdown = cleanup.shutdown_handle();
    cleanup.spawn(JobCleanupTask::new(Arc::clone(&state.job_manager)));

    // OpenAPI document is served as plain JSON
    let openapi = ApiDoc::openapi();
    let app = handlers::router(Arc::clone(&state))
        .route(
            "/api/openapi.json",
            axum::routing::get(move || {
                let doc = openapi.clone();
                async move { axum::Json(doc) }
            }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cleanup_shutdown.shutdown();
    state.registry.dispose_all();
    tracing::info!("Metaforge stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
