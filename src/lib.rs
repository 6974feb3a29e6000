//! Metaforge Library
//!
//! This library contains all the core modules for the Metaforge service:
//! connection registry, database handlers, profiler, LLM gateway, pipeline
//! orchestrator, job manager, and storage adapter.

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use services::{
    ConnectionRegistry, CostLedger, JobManager, LlmGateway, MetadataPipeline, MetadataStore,
};

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI
/// container. Process-wide mutable state (cost ledger, handler cache,
/// session credentials) is constructed once here and injected downward.
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::SqlitePool,

    pub registry: Arc<ConnectionRegistry>,
    pub ledger: Arc<CostLedger>,
    pub gateway: Arc<LlmGateway>,
    pub pipeline: Arc<MetadataPipeline>,
    pub store: Arc<MetadataStore>,
    pub job_manager: Arc<JobManager>,
}

impl AppState {
    /// Wire the full service graph from configuration
    pub fn build(config: &Config, db: sqlx::SqlitePool) -> Result<Self, anyhow::Error> {
        let registry = Arc::new(ConnectionRegistry::new(db.clone(), config));
        let ledger = Arc::new(CostLedger::new(config.llm.max_cost_usd, &config.llm.pricing));
        let gateway = Arc::new(LlmGateway::new(
            &config.llm,
            config.retry.clone(),
            Arc::clone(&ledger),
        )?);
        let pipeline = Arc::new(MetadataPipeline::new(
            Arc::clone(&registry),
            Arc::clone(&gateway),
        ));
        let store = Arc::new(MetadataStore::new(config.storage.metadata_dir.clone()));
        let job_manager = Arc::new(JobManager::new(
            Arc::clone(&pipeline),
            Arc::clone(&store),
            config.jobs.max_age_hours,
        ));

        Ok(Self { db, registry, ledger, gateway, pipeline, store, job_manager })
    }
}

#[cfg(test)]
mod tests;
