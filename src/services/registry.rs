// Connection Registry
// Purpose: resolve named connections to live database handlers, merging
// user-, system-, and file-tier specs with user > system > file precedence.

use dashmap::DashMap;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Config, SamplingConfig};
use crate::models::connection::{
    ConnectionSpec, CredentialRef, DatabaseEngine, SchemaFilter, SourceTier,
};
use crate::services::db::{self, DatabaseHandler};
use crate::utils::{ApiError, ApiResult};

/// Owner recorded on system-tier rows
const SYSTEM_OWNER: &str = "_system";
/// Owner recorded on file-tier specs
const FILE_OWNER: &str = "_file";

pub struct ConnectionRegistry {
    db: SqlitePool,
    file_tier: HashMap<String, ConnectionSpec>,
    /// Memoized handlers keyed by (owner, name)
    handlers: DashMap<(String, String), Arc<dyn DatabaseHandler>>,
    /// Short-lived secrets keyed by (owner, name)
    session_credentials: DashMap<(String, String), String>,
    /// Serializes handler construction so concurrent resolutions of the
    /// same connection build exactly one handler
    build_lock: tokio::sync::Mutex<()>,
    sampling: SamplingConfig,
}

impl ConnectionRegistry {
    pub fn new(db: SqlitePool, config: &Config) -> Self {
        let mut file_tier = HashMap::new();
        for (name, file_conn) in &config.connections {
            match Self::file_spec(name, file_conn) {
                Some(spec) => {
                    file_tier.insert(name.clone(), spec);
                }
                None => {
                    tracing::warn!(
                        "Ignoring file connection '{}': unknown engine '{}'",
                        name,
                        file_conn.engine
                    );
                }
            }
        }
        tracing::info!("Loaded {} file-tier connections", file_tier.len());

        Self {
            db,
            file_tier,
            handlers: DashMap::new(),
            session_credentials: DashMap::new(),
            build_lock: tokio::sync::Mutex::new(()),
            sampling: config.sampling.clone(),
        }
    }

    fn file_spec(name: &str, file_conn: &crate::config::FileConnection) -> Option<ConnectionSpec> {
        let engine = DatabaseEngine::parse(&file_conn.engine)?;
        let credentials = if let Some(password) = &file_conn.password {
            CredentialRef::Inline { secret: password.clone() }
        } else if let Some(var) = &file_conn.password_env {
            CredentialRef::Env { var: var.clone() }
        } else {
            CredentialRef::None
        };
        Some(ConnectionSpec {
            name: name.to_string(),
            engine,
            host: file_conn.host.clone(),
            port: file_conn.port,
            database: file_conn.database.clone(),
            username: file_conn.username.clone(),
            credentials,
            allowed_schemas: file_conn.allowed_schemas.clone(),
            predefined_schemas: file_conn.predefined_schemas.clone(),
            tier: SourceTier::File,
            owner: FILE_OWNER.to_string(),
        })
    }

    // ========================================
    // Lookup
    // ========================================

    /// Tiered spec lookup: user > system > file
    pub async fn get_spec(&self, owner: &str, name: &str) -> ApiResult<ConnectionSpec> {
        if let Some(spec) = self.load_db_spec(owner, name, SourceTier::User).await? {
            return Ok(spec);
        }
        if let Some(spec) = self.load_db_spec(SYSTEM_OWNER, name, SourceTier::System).await? {
            return Ok(spec);
        }
        if let Some(spec) = self.file_tier.get(name) {
            return Ok(spec.clone());
        }
        Err(ApiError::not_found(format!("connection '{}'", name)))
    }

    pub async fn exists(&self, owner: &str, name: &str) -> bool {
        self.get_spec(owner, name).await.is_ok()
    }

    /// All connections visible to an owner, tier precedence applied per name
    pub async fn list(&self, owner: &str) -> ApiResult<Vec<ConnectionSpec>> {
        let mut merged: HashMap<String, ConnectionSpec> = HashMap::new();
        for spec in self.file_tier.values() {
            merged.insert(spec.name.clone(), spec.clone());
        }
        for spec in self.load_db_specs(SYSTEM_OWNER, SourceTier::System).await? {
            merged.insert(spec.name.clone(), spec);
        }
        for spec in self.load_db_specs(owner, SourceTier::User).await? {
            merged.insert(spec.name.clone(), spec);
        }
        let mut specs: Vec<ConnectionSpec> = merged.into_values().collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(specs)
    }

    /// Resolve a named connection to a ready handler, memoized per
    /// (owner, name) until the registry is invalidated.
    pub async fn resolve(&self, owner: &str, name: &str) -> ApiResult<Arc<dyn DatabaseHandler>> {
        let key = (owner.to_string(), name.to_string());
        if let Some(handler) = self.handlers.get(&key) {
            return Ok(Arc::clone(&handler));
        }

        let _guard = self.build_lock.lock().await;
        if let Some(handler) = self.handlers.get(&key) {
            return Ok(Arc::clone(&handler));
        }

        let spec = self.get_spec(owner, name).await?;
        let secret = self.resolve_credentials(owner, &spec)?;
        let handler = db::create_handler(&spec, secret, &self.sampling).await?;

        self.handlers.insert(key, Arc::clone(&handler));
        tracing::info!("Created handler for connection '{}' ({})", name, spec.engine.as_str());
        Ok(handler)
    }

    /// Resolve the secret for a spec per its credential strategy
    fn resolve_credentials(&self, owner: &str, spec: &ConnectionSpec) -> ApiResult<Option<String>> {
        match &spec.credentials {
            CredentialRef::None => Ok(None),
            CredentialRef::Inline { secret } => Ok(Some(secret.clone())),
            CredentialRef::Env { var } => match std::env::var(var) {
                Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
                _ => {
                    tracing::error!(
                        "Environment variable '{}' for connection '{}' is unset",
                        var,
                        spec.name
                    );
                    Err(ApiError::auth_missing(spec.name.clone()))
                }
            },
            CredentialRef::SessionCache => {
                let key = (owner.to_string(), spec.name.clone());
                match self.session_credentials.get(&key) {
                    Some(secret) => Ok(Some(secret.clone())),
                    None => Err(ApiError::auth_missing(spec.name.clone())),
                }
            }
        }
    }

    // ========================================
    // User-tier mutation (system and file tiers are read-only here)
    // ========================================

    /// Persist a user-tier spec. Inline secrets are moved into the session
    /// cache, never stored.
    pub async fn add_user_connection(
        &self,
        owner: &str,
        mut spec: ConnectionSpec,
    ) -> ApiResult<ConnectionSpec> {
        if self.load_db_spec(owner, &spec.name, SourceTier::User).await?.is_some() {
            return Err(ApiError::validation_error(format!(
                "connection '{}' already exists",
                spec.name
            )));
        }

        spec.tier = SourceTier::User;
        spec.owner = owner.to_string();
        if let CredentialRef::Inline { secret } = &spec.credentials {
            self.cache_session_credential(owner, &spec.name, secret.clone());
            spec.credentials = CredentialRef::SessionCache;
        }

        self.insert_db_spec(&spec).await?;
        tracing::info!("Added user connection '{}' for owner '{}'", spec.name, owner);
        Ok(spec)
    }

    pub async fn update_user_connection(
        &self,
        owner: &str,
        mut spec: ConnectionSpec,
    ) -> ApiResult<ConnectionSpec> {
        if self.load_db_spec(owner, &spec.name, SourceTier::User).await?.is_none() {
            return Err(ApiError::not_found(format!("connection '{}'", spec.name)));
        }

        spec.tier = SourceTier::User;
        spec.owner = owner.to_string();
        if let CredentialRef::Inline { secret } = &spec.credentials {
            self.cache_session_credential(owner, &spec.name, secret.clone());
            spec.credentials = CredentialRef::SessionCache;
        }

        self.delete_db_spec(owner, &spec.name).await?;
        self.insert_db_spec(&spec).await?;
        self.invalidate(owner, &spec.name);
        tracing::info!("Updated user connection '{}' for owner '{}'", spec.name, owner);
        Ok(spec)
    }

    pub async fn delete_user_connection(&self, owner: &str, name: &str) -> ApiResult<()> {
        if self.load_db_spec(owner, name, SourceTier::User).await?.is_none() {
            return Err(ApiError::not_found(format!("connection '{}'", name)));
        }
        self.delete_db_spec(owner, name).await?;
        self.invalidate(owner, name);
        self.session_credentials.remove(&(owner.to_string(), name.to_string()));
        tracing::info!("Deleted user connection '{}' for owner '{}'", name, owner);
        Ok(())
    }

    /// Replace the predefined schema filters of a user-tier connection
    pub async fn put_predefined_schemas(
        &self,
        owner: &str,
        name: &str,
        filters: HashMap<String, SchemaFilter>,
    ) -> ApiResult<ConnectionSpec> {
        let mut spec = self
            .load_db_spec(owner, name, SourceTier::User)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("user connection '{}'", name)))?;
        spec.predefined_schemas = filters;
        self.delete_db_spec(owner, name).await?;
        self.insert_db_spec(&spec).await?;
        Ok(spec)
    }

    /// Insert or replace one schema filter entry
    pub async fn set_schema_filter(
        &self,
        owner: &str,
        name: &str,
        schema: &str,
        filter: SchemaFilter,
    ) -> ApiResult<ConnectionSpec> {
        let mut spec = self
            .load_db_spec(owner, name, SourceTier::User)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("user connection '{}'", name)))?;
        spec.predefined_schemas.insert(schema.to_string(), filter);
        self.delete_db_spec(owner, name).await?;
        self.insert_db_spec(&spec).await?;
        Ok(spec)
    }

    pub async fn remove_schema_filter(
        &self,
        owner: &str,
        name: &str,
        schema: &str,
    ) -> ApiResult<ConnectionSpec> {
        let mut spec = self
            .load_db_spec(owner, name, SourceTier::User)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("user connection '{}'", name)))?;
        if spec.predefined_schemas.remove(schema).is_none() {
            return Err(ApiError::not_found(format!("schema filter '{}'", schema)));
        }
        self.delete_db_spec(owner, name).await?;
        self.insert_db_spec(&spec).await?;
        Ok(spec)
    }

    // ========================================
    // Cache management
    // ========================================

    pub fn cache_session_credential(&self, owner: &str, name: &str, secret: String) {
        self.session_credentials.insert((owner.to_string(), name.to_string()), secret);
        // A new secret invalidates any handler built with the old one
        self.invalidate(owner, name);
    }

    pub fn clear_session_credentials(&self, owner: &str) {
        self.session_credentials.retain(|(o, _), _| o != owner);
    }

    /// Drop the memoized handler for one connection
    pub fn invalidate(&self, owner: &str, name: &str) {
        if self.handlers.remove(&(owner.to_string(), name.to_string())).is_some() {
            tracing::debug!("Invalidated handler cache for '{}'/'{}'", owner, name);
        }
    }

    /// Drop every memoized handler (process shutdown)
    pub fn dispose_all(&self) {
        let count = self.handlers.len();
        self.handlers.clear();
        tracing::info!("Disposed {} cached database handlers", count);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    // ========================================
    // Persistence
    // ========================================

    async fn load_db_spec(
        &self,
        owner: &str,
        name: &str,
        tier: SourceTier,
    ) -> ApiResult<Option<ConnectionSpec>> {
        let tier_str = tier_str(tier);
        let row: Option<ConnectionRow> = sqlx::query_as(
            "SELECT owner, name, tier, engine, host, port, database_name, username, \
                    credential_type, credential_env, allowed_schemas, predefined_schemas \
             FROM connections WHERE owner = ? AND name = ? AND tier = ?",
        )
        .bind(owner)
        .bind(name)
        .bind(tier_str)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.and_then(|r| r.into_spec()))
    }

    async fn load_db_specs(&self, owner: &str, tier: SourceTier) -> ApiResult<Vec<ConnectionSpec>> {
        let rows: Vec<ConnectionRow> = sqlx::query_as(
            "SELECT owner, name, tier, engine, host, port, database_name, username, \
                    credential_type, credential_env, allowed_schemas, predefined_schemas \
             FROM connections WHERE owner = ? AND tier = ? ORDER BY name",
        )
        .bind(owner)
        .bind(tier_str(tier))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().filter_map(|r| r.into_spec()).collect())
    }

    async fn insert_db_spec(&self, spec: &ConnectionSpec) -> ApiResult<()> {
        let (credential_type, credential_env) = match &spec.credentials {
            CredentialRef::None => ("none", None),
            CredentialRef::Env { var } => ("env", Some(var.clone())),
            CredentialRef::SessionCache => ("session", None),
            // Inline secrets are never persisted
            CredentialRef::Inline { .. } => ("session", None),
        };
        let allowed = spec
            .allowed_schemas
            .as_ref()
            .map(|schemas| serde_json::to_string(schemas))
            .transpose()?;
        let predefined = serde_json::to_string(&spec.predefined_schemas)?;

        sqlx::query(
            "INSERT INTO connections \
             (owner, name, tier, engine, host, port, database_name, username, \
              credential_type, credential_env, allowed_schemas, predefined_schemas) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&spec.owner)
        .bind(&spec.name)
        .bind(tier_str(spec.tier))
        .bind(spec.engine.as_str())
        .bind(&spec.host)
        .bind(spec.port.map(|p| p as i64))
        .bind(&spec.database)
        .bind(&spec.username)
        .bind(credential_type)
        .bind(credential_env)
        .bind(allowed)
        .bind(predefined)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn delete_db_spec(&self, owner: &str, name: &str) -> ApiResult<()> {
        sqlx::query("DELETE FROM connections WHERE owner = ? AND name = ? AND tier = 'user'")
            .bind(owner)
            .bind(name)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

fn tier_str(tier: SourceTier) -> &'static str {
    match tier {
        SourceTier::User => "user",
        SourceTier::System => "system",
        SourceTier::File => "file",
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConnectionRow {
    owner: String,
    name: String,
    tier: String,
    engine: String,
    host: Option<String>,
    port: Option<i64>,
    database_name: Option<String>,
    username: Option<String>,
    credential_type: String,
    credential_env: Option<String>,
    allowed_schemas: Option<String>,
    predefined_schemas: Option<String>,
}

impl ConnectionRow {
    fn into_spec(self) -> Option<ConnectionSpec> {
        let engine = DatabaseEngine::parse(&self.engine)?;
        let credentials = match self.credential_type.as_str() {
            "env" => CredentialRef::Env { var: self.credential_env.unwrap_or_default() },
            "session" => CredentialRef::SessionCache,
            _ => CredentialRef::None,
        };
        let tier = match self.tier.as_str() {
            "system" => SourceTier::System,
            _ => SourceTier::User,
        };
        let allowed_schemas = self
            .allowed_schemas
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        let predefined_schemas = self
            .predefined_schemas
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();

        Some(ConnectionSpec {
            name: self.name,
            engine,
            host: self.host,
            port: self.port.map(|p| p as u16),
            database: self.database_name,
            username: self.username,
            credentials,
            allowed_schemas,
            predefined_schemas,
            tier,
            owner: self.owner,
        })
    }
}
