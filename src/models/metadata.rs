//! Metadata document model
//!
//! `MetadataDocument` is the composite output of the generation pipeline,
//! keyed by `(database, schema, table)`. Everything in here is plain data;
//! assembly happens in the pipeline service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// One record of a table sample: column name -> value
pub type SampleRow = serde_json::Map<String, serde_json::Value>;

/// How a sample was drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    Full,
    RandomOffset,
    Stratified,
    PartitionAware,
}

/// Materialized sample handed to the profiler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSample {
    /// Column order as introspected from the table schema
    pub columns: Vec<String>,
    pub rows: Vec<SampleRow>,
    pub method: SamplingMethod,
}

impl TableSample {
    pub fn empty(columns: Vec<String>, method: SamplingMethod) -> Self {
        Self { columns, rows: Vec::new(), method }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Values of one column across all sampled rows
    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a serde_json::Value> {
        self.rows
            .iter()
            .map(move |row| row.get(column).unwrap_or(&serde_json::Value::Null))
    }
}

/// Declared type information for one column, as introspected from the engine
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub numeric_precision: Option<i64>,
    pub numeric_scale: Option<i64>,
    pub character_maximum_length: Option<i64>,
    /// Engine-supplied column comment, when the engine has one
    pub comment: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            numeric_precision: None,
            numeric_scale: None,
            character_maximum_length: None,
            comment: None,
        }
    }
}

/// Introspected table schema; preserves the engine's column order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }
}

/// Result of the profiler's type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ColumnClassification {
    Categorical,
    Numerical,
    Other,
}

/// Statistics for a numerical column, computed over the sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Per-column data-quality signals
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct QualityMetrics {
    /// Percentage of non-null values in the sample
    pub completeness: f64,
    /// Unique / total percentage in the sample
    pub uniqueness: f64,
    #[serde(default)]
    pub common_issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub index_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ForeignKey {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UniqueConstraint {
    pub name: Option<String>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckConstraint {
    pub name: Option<String>,
    pub expression: String,
}

/// Table constraints as extracted from the engine catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Constraints {
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub unique_constraints: Vec<UniqueConstraint>,
    #[serde(default)]
    pub check_constraints: Vec<CheckConstraint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PartitionEntry {
    pub partition_id: String,
    pub row_count: i64,
    pub byte_size: i64,
}

/// Native partitioning facts; only engines that partition report this
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PartitionInfo {
    pub is_partitioned: bool,
    pub partition_type: Option<String>,
    pub partition_column: Option<String>,
    #[serde(default)]
    pub clustering_fields: Vec<String>,
    /// Ordered newest-first, bounded at probe time
    #[serde(default)]
    pub available_partitions: Vec<PartitionEntry>,
}

/// Where a column definition came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionSource {
    EngineSchema,
    PatternBased,
    LlmEnhanced,
    Fallback,
}

/// LLM-refined or rule-derived description of one column
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ColumnDefinition {
    pub definition: String,
    /// Human-readable name, at most three words
    pub business_name: String,
    pub purpose: String,
    pub format: String,
    #[serde(default)]
    pub business_rules: Vec<String>,
    pub source: DefinitionSource,
}

/// Everything the document records about a single column
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub description: String,
    /// Engine comment before any enhancement, when one existed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_description: Option<String>,
    pub business_name: String,
    pub purpose: String,
    pub format: String,
    #[serde(default)]
    pub business_rules: Vec<String>,
    pub definition_source: DefinitionSource,
    pub classification: ColumnClassification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<NumericStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_quality: Option<QualityMetrics>,
    /// Observed distinct values, bounded at 100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categorical_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_precision: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_scale: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_maximum_length: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DataLifecycle {
    pub update_frequency: String,
    pub retention_policy: String,
    pub archival_strategy: String,
}

/// Table-level narrative; required core of the insights prompt
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TableInsights {
    pub domain: String,
    pub category: String,
    /// Markdown description
    pub description: String,
    pub purpose: String,
    #[serde(default)]
    pub usage_patterns: Vec<String>,
    pub data_lifecycle: DataLifecycle,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub special_handling: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_quality_recommendations: Vec<String>,
}

/// The exact flag set a pipeline run honored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OptionalSections {
    pub relationships: bool,
    pub aggregation_rules: bool,
    pub query_rules: bool,
    pub data_quality: bool,
    pub query_examples: bool,
    pub additional_insights: bool,
    pub business_rules: bool,
    pub categorical_definitions: bool,
}

impl Default for OptionalSections {
    fn default() -> Self {
        Self {
            relationships: true,
            aggregation_rules: true,
            query_rules: true,
            data_quality: true,
            query_examples: true,
            additional_insights: true,
            business_rules: true,
            categorical_definitions: true,
        }
    }
}

impl OptionalSections {
    pub fn none() -> Self {
        Self {
            relationships: false,
            aggregation_rules: false,
            query_rules: false,
            data_quality: false,
            query_examples: false,
            additional_insights: false,
            business_rules: false,
            categorical_definitions: false,
        }
    }
}

/// Knobs for one pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GenerateOptions {
    pub sample_size: usize,
    pub num_samples: usize,
    /// BigQuery only: cap on partitions probed for sampling
    pub max_partitions: usize,
    pub sections: OptionalSections,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            sample_size: 20,
            num_samples: 5,
            max_partitions: 10,
            sections: OptionalSections::default(),
        }
    }
}

/// Timing and counters for one pipeline step
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StepStat {
    pub step: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_processed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns_processed: Option<usize>,
}

/// Run accounting embedded in the final document
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProcessingStats {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_duration_ms: u64,
    #[serde(default)]
    pub steps: Vec<StepStat>,
    pub optional_sections: OptionalSections,
    pub sampling_method: Option<SamplingMethod>,
    pub total_tokens: i64,
    pub llm_request_count: i64,
    pub estimated_cost_usd: f64,
}

/// Table-level data-quality summary (flag-gated section)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TableDataQuality {
    /// Rows inspected for quality metrics
    pub sample_analyzed: usize,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// The composite pipeline output
///
/// Identity is `(database_name, schema_name, table_name)`. Documents are
/// written whole and never mutated in place; a regeneration replaces the
/// stored file atomically.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MetadataDocument {
    pub database_name: String,
    pub schema_name: String,
    pub table_name: String,
    /// Markdown table description (mirrors `table_insights.description`)
    pub description: String,
    pub columns: BTreeMap<String, ColumnMetadata>,
    pub constraints: Constraints,
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_info: Option<PartitionInfo>,
    pub table_insights: TableInsights,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub relationships: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub business_rules: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub aggregation_rules: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub query_rules: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub query_examples: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub additional_insights: Option<serde_json::Value>,
    /// value -> short definition per categorical column
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categorical_definitions: Option<BTreeMap<String, BTreeMap<String, String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_quality: Option<TableDataQuality>,
    pub processing_stats: ProcessingStats,
    pub generated_at: DateTime<Utc>,
}
