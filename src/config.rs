use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::models::connection::SchemaFilter;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub sampling: SamplingConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
    /// File-tier connections, keyed by connection name
    pub connections: HashMap<String, FileConnection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Application-state database (connection specs live here)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the `{db}/{schema}/{table}.json` layout
    pub metadata_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    /// Environment variable holding the provider API key
    pub api_key_env: String,
    pub api_base: String,
    pub model: String,
    /// Hard ceiling for cumulative spend across the process
    pub max_cost_usd: f64,
    pub timeout_secs: u64,
    /// Bounded in-flight calls against the provider
    pub max_concurrent_requests: usize,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Price per 1k tokens keyed by model-name substring; merged over the
    /// compiled-in defaults
    pub pricing: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_wait_ms: u64,
    pub max_wait_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Dry-run byte ceiling for partition-aware sampling (BigQuery)
    pub max_scan_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Terminal jobs older than this are purged
    pub max_age_hours: i64,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// One file-tier connection entry from config.toml
#[derive(Debug, Clone, Deserialize)]
pub struct FileConnection {
    pub engine: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    /// Inline secret; prefer `password_env` outside development
    pub password: Option<String>,
    pub password_env: Option<String>,
    pub allowed_schemas: Option<Vec<String>>,
    #[serde(default)]
    pub predefined_schemas: HashMap<String, SchemaFilter>,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "metaforge")]
#[command(version, about = "Metaforge - Table Metadata Generation Service")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Application database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Metadata output directory (overrides config file)
    #[arg(long, value_name = "DIR")]
    pub metadata_dir: Option<String>,

    /// Logging level (overrides config file, e.g., "info,metaforge=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// LLM model identifier (overrides config file)
    #[arg(long, value_name = "MODEL")]
    pub llm_model: Option<String>,

    /// LLM API base URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub llm_api_base: Option<String>,

    /// LLM cumulative cost ceiling in USD (overrides config file)
    #[arg(long, value_name = "USD")]
    pub llm_max_cost_usd: Option<f64>,

    /// Enable/disable LLM enrichment (overrides config file)
    #[arg(long, value_name = "BOOL")]
    pub llm_enabled: Option<bool>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_DATABASE_URL
    /// - APP_METADATA_DIR
    /// - APP_LOG_LEVEL
    /// - LLM_API_BASE / LLM_MODEL
    /// - LLM_MAX_COST_USD
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
                tracing::info!("Override server.port from env: {}", self.server.port);
            }
        }

        if let Ok(db_url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("Override database.url from env");
        }

        if let Ok(dir) = std::env::var("APP_METADATA_DIR") {
            self.storage.metadata_dir = dir;
            tracing::info!("Override storage.metadata_dir from env: {}", self.storage.metadata_dir);
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(base) = std::env::var("LLM_API_BASE") {
            self.llm.api_base = base;
            tracing::info!("Override llm.api_base from env");
        }

        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm.model = model;
            tracing::info!("Override llm.model from env: {}", self.llm.model);
        }

        if let Ok(limit) = std::env::var("LLM_MAX_COST_USD") {
            match limit.parse::<f64>() {
                Ok(val) => {
                    self.llm.max_cost_usd = val;
                    tracing::info!("Override llm.max_cost_usd from env: {}", val);
                }
                Err(e) => tracing::warn!(
                    "Invalid LLM_MAX_COST_USD '{}': {} (keep {})",
                    limit,
                    e,
                    self.llm.max_cost_usd
                ),
            }
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(db_url) = &args.database_url {
            self.database.url = db_url.clone();
            tracing::info!("Override database.url from CLI");
        }

        if let Some(dir) = &args.metadata_dir {
            self.storage.metadata_dir = dir.clone();
            tracing::info!("Override storage.metadata_dir from CLI: {}", self.storage.metadata_dir);
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(model) = &args.llm_model {
            self.llm.model = model.clone();
            tracing::info!("Override llm.model from CLI: {}", self.llm.model);
        }

        if let Some(base) = &args.llm_api_base {
            self.llm.api_base = base.clone();
            tracing::info!("Override llm.api_base from CLI");
        }

        if let Some(limit) = args.llm_max_cost_usd {
            self.llm.max_cost_usd = limit;
            tracing::info!("Override llm.max_cost_usd from CLI: {}", limit);
        }

        if let Some(enabled) = args.llm_enabled {
            self.llm.enabled = enabled;
            tracing::info!("Override llm.enabled from CLI: {}", enabled);
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.storage.metadata_dir.is_empty() {
            anyhow::bail!("storage.metadata_dir cannot be empty");
        }

        if self.llm.max_cost_usd <= 0.0 {
            anyhow::bail!("llm.max_cost_usd must be > 0");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be >= 1");
        }

        if self.jobs.max_age_hours <= 0 {
            anyhow::bail!("jobs.max_age_hours must be > 0");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/metaforge.db?mode=rwc".to_string() }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { metadata_dir: "metadata_storage".to_string() }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_env: "LLM_API_KEY".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4-turbo".to_string(),
            max_cost_usd: 10.0,
            timeout_secs: 30,
            max_concurrent_requests: 4,
            temperature: 0.2,
            max_tokens: 4000,
            pricing: HashMap::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, initial_wait_ms: 1000, max_wait_ms: 10_000 }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        // 10 GiB
        Self { max_scan_bytes: 10 * 1024 * 1024 * 1024 }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { max_age_hours: 24, cleanup_interval_secs: 3600 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,metaforge=debug".to_string(),
            file: Some("logs/metaforge.log".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.llm.max_cost_usd, 10.0);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn parses_file_tier_connections() {
        let toml_src = r#"
            [connections.warehouse]
            engine = "postgres"
            host = "db.internal"
            port = 5432
            database = "warehouse"
            username = "reader"
            password_env = "WAREHOUSE_PASSWORD"
            allowed_schemas = ["public", "analytics"]

            [connections.warehouse.predefined_schemas.analytics]
            enabled = true
            tables = ["events"]
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        let conn = config.connections.get("warehouse").unwrap();
        assert_eq!(conn.engine, "postgres");
        assert_eq!(conn.port, Some(5432));
        assert_eq!(conn.password_env.as_deref(), Some("WAREHOUSE_PASSWORD"));
        let filter = conn.predefined_schemas.get("analytics").unwrap();
        assert_eq!(filter.tables, vec!["events".to_string()]);
    }
}
