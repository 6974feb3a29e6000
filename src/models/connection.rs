//! Connection descriptors and schema filtering
//!
//! A `ConnectionSpec` names everything needed to reach a source database.
//! Specs come from three tiers (user, system, file) with user > system > file
//! precedence at lookup time.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// Supported source database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Postgres,
    Mysql,
    Sqlite,
    Oracle,
    Bigquery,
    Duckdb,
}

impl DatabaseEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Sqlite => "sqlite",
            Self::Oracle => "oracle",
            Self::Bigquery => "bigquery",
            Self::Duckdb => "duckdb",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" => Some(Self::Mysql),
            "sqlite" => Some(Self::Sqlite),
            "oracle" => Some(Self::Oracle),
            "bigquery" => Some(Self::Bigquery),
            "duckdb" => Some(Self::Duckdb),
            _ => None,
        }
    }

    /// Default schema when a request omits one
    pub fn default_schema(&self) -> &'static str {
        match self {
            Self::Postgres => "public",
            Self::Sqlite | Self::Duckdb => "main",
            _ => "public",
        }
    }
}

/// Where a spec was defined; lookup precedence is User > System > File
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    User,
    System,
    File,
}

/// How the password / token for a connection is obtained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialRef {
    /// No credential needed (SQLite, DuckDB, trust auth)
    None,
    /// Secret carried inline in the spec; never persisted to the file tier
    Inline { secret: String },
    /// Secret read from the named environment variable at resolve time
    Env { var: String },
    /// Secret supplied earlier in this process via the session cache
    SessionCache,
}

impl Default for CredentialRef {
    fn default() -> Self {
        Self::None
    }
}

/// Named descriptor for reaching a source database
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionSpec {
    pub name: String,
    pub engine: DatabaseEngine,
    /// Host for network engines; unused for file engines
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Database name, file path (sqlite/duckdb) or project id (bigquery)
    pub database: Option<String>,
    pub username: Option<String>,
    #[serde(default)]
    pub credentials: CredentialRef,
    /// When present, only these schemas are visible through the API
    pub allowed_schemas: Option<Vec<String>>,
    /// Per-schema table filters keyed by schema name
    #[serde(default)]
    pub predefined_schemas: HashMap<String, SchemaFilter>,
    pub tier: SourceTier,
    pub owner: String,
}

impl ConnectionSpec {
    /// Filter for a schema, if one is predefined
    pub fn schema_filter(&self, schema: &str) -> Option<&SchemaFilter> {
        self.predefined_schemas.get(schema)
    }

    pub fn schema_allowed(&self, schema: &str) -> bool {
        match &self.allowed_schemas {
            Some(allowed) => allowed.iter().any(|s| s == schema),
            None => true,
        }
    }
}

/// Per-schema table inclusion policy
///
/// Evaluation order is fixed:
/// 1. disabled schema yields nothing;
/// 2. explicit `tables` allow-list restricts the raw list;
/// 3. `include_patterns` keep only matching tables (intersected with 2);
/// 4. `excluded_tables` are removed;
/// 5. `exclude_patterns` remove any remaining match.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SchemaFilter {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Explicit allow-list; empty means "all tables"
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub excluded_tables: Vec<String>,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for SchemaFilter {
    fn default() -> Self {
        Self {
            enabled: true,
            tables: Vec::new(),
            excluded_tables: Vec::new(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            description: None,
        }
    }
}

impl SchemaFilter {
    /// Apply the filter to a raw table list. Idempotent.
    pub fn apply(&self, raw: &[String]) -> Vec<String> {
        if !self.enabled {
            return Vec::new();
        }

        let mut result: Vec<String> = raw.to_vec();

        if !self.tables.is_empty() {
            result.retain(|t| self.tables.iter().any(|a| a == t));
        }

        if !self.include_patterns.is_empty() {
            let patterns = compile_patterns(&self.include_patterns);
            result.retain(|t| patterns.iter().any(|p| p.is_match(t)));
        }

        if !self.excluded_tables.is_empty() {
            result.retain(|t| !self.excluded_tables.iter().any(|e| e == t));
        }

        if !self.exclude_patterns.is_empty() {
            let patterns = compile_patterns(&self.exclude_patterns);
            result.retain(|t| !patterns.iter().any(|p| p.is_match(t)));
        }

        result
    }
}

/// Compile pattern strings, dropping any that fail to parse
fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("Ignoring invalid table pattern '{}': {}", p, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn disabled_filter_yields_nothing() {
        let filter = SchemaFilter { enabled: false, ..Default::default() };
        assert!(filter.apply(&raw(&["a", "b"])).is_empty());
    }

    #[test]
    fn empty_filter_keeps_everything() {
        let filter = SchemaFilter::default();
        assert_eq!(filter.apply(&raw(&["a", "b"])), raw(&["a", "b"]));
    }

    #[test]
    fn explicit_tables_intersect_with_include_patterns() {
        let filter = SchemaFilter {
            tables: raw(&["users", "orders", "events"]),
            include_patterns: vec!["^user".to_string(), "^order".to_string()],
            ..Default::default()
        };
        assert_eq!(
            filter.apply(&raw(&["users", "orders", "events", "sessions"])),
            raw(&["users", "orders"])
        );
    }

    #[test]
    fn exclusions_run_after_inclusions() {
        let filter = SchemaFilter {
            include_patterns: vec!["^fact_".to_string()],
            excluded_tables: raw(&["fact_tmp"]),
            exclude_patterns: vec!["_backup$".to_string()],
            ..Default::default()
        };
        assert_eq!(
            filter.apply(&raw(&["fact_sales", "fact_tmp", "fact_sales_backup", "dim_date"])),
            raw(&["fact_sales"])
        );
    }

    #[test]
    fn filter_application_is_idempotent() {
        let filter = SchemaFilter {
            include_patterns: vec!["^t".to_string()],
            excluded_tables: raw(&["t_skip"]),
            ..Default::default()
        };
        let once = filter.apply(&raw(&["t_one", "t_skip", "other"]));
        let twice = filter.apply(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn no_match_patterns_yield_empty_not_error() {
        let filter = SchemaFilter {
            include_patterns: vec!["^wont_match$".to_string()],
            ..Default::default()
        };
        let fifty: Vec<String> = (0..50).map(|i| format!("table_{}", i)).collect();
        assert!(filter.apply(&fifty).is_empty());
    }

    #[test]
    fn invalid_pattern_is_ignored() {
        let filter = SchemaFilter {
            include_patterns: vec!["(".to_string(), "^ok".to_string()],
            ..Default::default()
        };
        assert_eq!(filter.apply(&raw(&["ok_table", "bad"])), raw(&["ok_table"]));
    }
}
