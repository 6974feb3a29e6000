// Metadata Generation Pipeline
// Purpose: orchestrate acquire -> profile -> enrich -> assemble for one
// (database, schema, table) target.
//
// Failure semantics: stage 1 aborts the run; stage 2 facets degrade to
// zero values; stages 3-5 degrade to deterministic fallbacks. A produced
// document always matches the declared shape.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::models::metadata::{
    ColumnClassification, ColumnDefinition, ColumnInfo, ColumnMetadata, DataLifecycle,
    DefinitionSource, GenerateOptions, MetadataDocument, PartitionInfo, ProcessingStats,
    StepStat, TableDataQuality, TableInsights, TableSample, TableSchema,
};
use crate::services::db::{DatabaseHandler, SampleSpec};
use crate::services::llm::prompts::{
    COLUMN_SYSTEM_PROMPT, GLOSSARY_SYSTEM_PROMPT, INSIGHTS_SYSTEM_PROMPT, ColumnPromptContext,
    categorical_glossary_prompt, column_definitions_prompt, table_insights_prompt,
};
use crate::services::llm::{CostSnapshot, LlmGateway};
use crate::services::profiler::{self, FacetResults, meaningful_values};
use crate::services::registry::ConnectionRegistry;
use crate::utils::{ApiError, ApiResult, ensure_safe_identifier, title_case};

/// Progress milestones reported at stage boundaries
const PROGRESS_ACQUIRED: f64 = 0.1;
const PROGRESS_PROFILED: f64 = 0.4;
const PROGRESS_ENRICHED: f64 = 0.7;
const PROGRESS_DONE: f64 = 1.0;

/// Glossary generation skips columns with more meaningful values than this
const GLOSSARY_VALUE_LIMIT: usize = 20;

pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Per-run hooks: cancellation flag and progress reporting
#[derive(Clone, Default)]
pub struct RunHooks {
    pub cancel: Option<Arc<AtomicBool>>,
    pub progress: Option<ProgressFn>,
}

impl RunHooks {
    fn check_cancel(&self) -> ApiResult<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(ApiError::Cancelled);
            }
        }
        Ok(())
    }

    fn report(&self, progress: f64) {
        if let Some(callback) = &self.progress {
            callback(progress);
        }
    }
}

pub struct MetadataPipeline {
    registry: Arc<ConnectionRegistry>,
    gateway: Arc<LlmGateway>,
}

impl MetadataPipeline {
    pub fn new(registry: Arc<ConnectionRegistry>, gateway: Arc<LlmGateway>) -> Self {
        Self { registry, gateway }
    }

    /// Run the full pipeline and return the assembled document
    pub async fn generate(
        &self,
        owner: &str,
        database: &str,
        schema: &str,
        table: &str,
        options: &GenerateOptions,
        hooks: &RunHooks,
    ) -> ApiResult<MetadataDocument> {
        ensure_safe_identifier(schema)?;
        ensure_safe_identifier(table)?;

        let run_start = Instant::now();
        let started_at = Utc::now();
        let cost_at_start = self.gateway.ledger().snapshot();
        let mut steps: Vec<StepStat> = Vec::new();

        tracing::info!(
            "Generating metadata for {}.{}.{} (sample {}x{})",
            database,
            schema,
            table,
            options.sample_size,
            options.num_samples
        );

        // ==================== Stage 1: acquire ====================
        hooks.check_cancel()?;
        let step_start = Instant::now();

        let handler = self.registry.resolve(owner, database).await?;

        let table_schema = handler
            .table_schema(schema, table)
            .await
            .map_err(|e| ApiError::stage_failed("acquire", e))?;
        if table_schema.is_empty() {
            return Err(ApiError::not_found(format!(
                "table {}.{} not found or has no columns",
                schema, table
            )));
        }

        let indexes = match handler.table_indexes(schema, table).await {
            Ok(indexes) => indexes,
            Err(e) => {
                tracing::warn!("Could not get indexes for {}.{}: {}", schema, table, e);
                Vec::new()
            }
        };

        let partition_info = match handler.partition_info(schema, table).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Could not get partition info for {}.{}: {}", schema, table, e);
                None
            }
        };

        let row_count = match handler.row_count(schema, table, true).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("Could not estimate row count for {}.{}: {}", schema, table, e);
                None
            }
        };

        let sample_spec = SampleSpec {
            sample_size: options.sample_size,
            num_samples: options.num_samples,
            max_partitions: options.max_partitions,
        };
        let sample = handler
            .sample(schema, table, &sample_spec)
            .await
            .map_err(|e| match e {
                ApiError::CostExceeded(_) => e,
                other => ApiError::stage_failed("acquire", other),
            })?;

        if sample.rows.is_empty() {
            tracing::warn!("No sample data retrieved for table {}.{}", schema, table);
        }

        steps.push(StepStat {
            step: "acquire_table_info".to_string(),
            duration_ms: step_start.elapsed().as_millis() as u64,
            rows_processed: Some(sample.row_count()),
            columns_processed: Some(table_schema.len()),
        });
        hooks.report(PROGRESS_ACQUIRED);

        // ==================== Stage 2: profile fan-out ====================
        hooks.check_cancel()?;
        let step_start = Instant::now();

        let classifications = profiler::classify_columns(&table_schema, &sample);
        let facets = profiler::profile_facets(
            Arc::clone(&handler),
            schema,
            table,
            &table_schema,
            &sample,
            &classifications,
            &options.sections,
            row_count,
        )
        .await;

        steps.push(StepStat {
            step: "profile_fanout".to_string(),
            duration_ms: step_start.elapsed().as_millis() as u64,
            rows_processed: Some(sample.row_count()),
            columns_processed: Some(table_schema.len()),
        });
        hooks.report(PROGRESS_PROFILED);

        // ==================== Stage 3: column definitions ====================
        hooks.check_cancel()?;
        let step_start = Instant::now();

        let definitions = self
            .column_definitions(
                database,
                schema,
                table,
                &table_schema,
                &facets,
                partition_info.as_ref(),
                hooks,
            )
            .await?;

        steps.push(StepStat {
            step: "column_definitions".to_string(),
            duration_ms: step_start.elapsed().as_millis() as u64,
            rows_processed: None,
            columns_processed: Some(definitions.len()),
        });

        // ==================== Stage 4: categorical glossary ====================
        hooks.check_cancel()?;
        let step_start = Instant::now();

        let categorical_definitions = if options.sections.categorical_definitions {
            let glossary = self.categorical_glossary(&facets, &definitions, hooks).await?;
            steps.push(StepStat {
                step: "categorical_definitions".to_string(),
                duration_ms: step_start.elapsed().as_millis() as u64,
                rows_processed: None,
                columns_processed: Some(glossary.len()),
            });
            Some(glossary)
        } else {
            None
        };

        // ==================== Stage 5: table insights ====================
        hooks.check_cancel()?;
        let step_start = Instant::now();

        let insights = self
            .table_insights(
                database,
                schema,
                table,
                &table_schema,
                &sample,
                &facets,
                &definitions,
                &options.sections,
            )
            .await;

        steps.push(StepStat {
            step: "table_insights".to_string(),
            duration_ms: step_start.elapsed().as_millis() as u64,
            rows_processed: None,
            columns_processed: None,
        });
        hooks.report(PROGRESS_ENRICHED);

        // ==================== Stage 6: assemble ====================
        hooks.check_cancel()?;

        let cost_at_end = self.gateway.ledger().snapshot();
        let document = assemble_document(AssembleInput {
            database,
            schema,
            table,
            table_schema: &table_schema,
            sample: &sample,
            classifications: &classifications,
            facets: &facets,
            definitions,
            categorical_definitions,
            insights,
            indexes,
            partition_info,
            row_count,
            options,
            started_at,
            steps,
            total_duration_ms: run_start.elapsed().as_millis() as u64,
            cost_at_start,
            cost_at_end,
        });

        hooks.report(PROGRESS_DONE);
        tracing::info!(
            "Metadata generated for {}.{}.{} in {} ms",
            database,
            schema,
            table,
            document.processing_stats.total_duration_ms
        );
        Ok(document)
    }

    // ========================================
    // Stage 3 internals
    // ========================================

    /// Partition columns by processing strategy, batch one LLM call for the
    /// ones that need enhancement, fall back deterministically on failure.
    #[allow(clippy::too_many_arguments)]
    async fn column_definitions(
        &self,
        database: &str,
        schema: &str,
        table: &str,
        table_schema: &TableSchema,
        facets: &FacetResults,
        partition_info: Option<&PartitionInfo>,
        hooks: &RunHooks,
    ) -> ApiResult<BTreeMap<String, ColumnDefinition>> {
        let mut definitions: BTreeMap<String, ColumnDefinition> = BTreeMap::new();
        let mut to_enhance: Vec<&ColumnInfo> = Vec::new();

        for column in &table_schema.columns {
            let existing = column.comment.as_deref().unwrap_or("");
            if !existing.is_empty() && description_sufficient(&column.name, existing) {
                definitions.insert(
                    column.name.clone(),
                    ColumnDefinition {
                        definition: existing.to_string(),
                        business_name: title_case(&column.name),
                        purpose: existing.to_string(),
                        format: "Standard format".to_string(),
                        business_rules: Vec::new(),
                        source: DefinitionSource::EngineSchema,
                    },
                );
            } else if is_self_explanatory(&column.name) {
                definitions.insert(column.name.clone(), pattern_definition(column));
            } else {
                to_enhance.push(column);
            }
        }

        tracing::info!(
            "Column processing strategy: {} as-is, {} pattern, {} enhanced",
            definitions
                .values()
                .filter(|d| d.source == DefinitionSource::EngineSchema)
                .count(),
            definitions
                .values()
                .filter(|d| d.source == DefinitionSource::PatternBased)
                .count(),
            to_enhance.len()
        );

        if !to_enhance.is_empty() {
            hooks.check_cancel()?;
            let enhanced = self
                .enhance_columns(database, schema, table, &to_enhance, facets, partition_info)
                .await;
            for column in &to_enhance {
                let definition = enhanced
                    .get(&column.name)
                    .cloned()
                    .unwrap_or_else(|| fallback_definition(column));
                definitions.insert(column.name.clone(), definition);
            }
        }

        // Note partition and clustering roles on the affected columns
        if let Some(info) = partition_info {
            if let Some(partition_column) = &info.partition_column {
                if let Some(definition) = definitions.get_mut(partition_column) {
                    definition
                        .business_rules
                        .push("Table is partitioned by this column".to_string());
                }
            }
            for field in &info.clustering_fields {
                if let Some(definition) = definitions.get_mut(field) {
                    definition
                        .business_rules
                        .push("Table is clustered by this column".to_string());
                }
            }
        }

        Ok(definitions)
    }

    /// One batched LLM call for all columns needing enhancement
    async fn enhance_columns(
        &self,
        database: &str,
        schema: &str,
        table: &str,
        columns: &[&ColumnInfo],
        facets: &FacetResults,
        partition_info: Option<&PartitionInfo>,
    ) -> HashMap<String, ColumnDefinition> {
        let mut enhanced = HashMap::new();
        if !self.gateway.is_available() {
            return enhanced;
        }

        let ctx = ColumnPromptContext {
            database,
            schema,
            table,
            constraints: &facets.constraints,
            partition_info,
            categorical_values: &facets.categorical_values,
            numeric_stats: &facets.numeric_stats,
        };
        let prompt = column_definitions_prompt(&ctx, columns);

        match self.gateway.call_json(&prompt, Some(COLUMN_SYSTEM_PROMPT)).await {
            Ok(response) => {
                for column in columns {
                    let Some(Value::Object(fields)) = response.get(&column.name) else {
                        continue;
                    };
                    enhanced.insert(
                        column.name.clone(),
                        ColumnDefinition {
                            definition: str_field(fields, "definition")
                                .unwrap_or_else(|| format!("Column {}", column.name)),
                            business_name: str_field(fields, "business_name")
                                .unwrap_or_else(|| title_case(&column.name)),
                            purpose: str_field(fields, "purpose").unwrap_or_default(),
                            format: str_field(fields, "format")
                                .unwrap_or_else(|| "Standard format".to_string()),
                            business_rules: string_list(fields.get("business_rules")),
                            source: DefinitionSource::LlmEnhanced,
                        },
                    );
                }
            }
            Err(e) => {
                tracing::warn!("Failed to generate column definitions via LLM: {}", e);
            }
        }
        enhanced
    }

    // ========================================
    // Stage 4 internals
    // ========================================

    /// value -> definition glossary per categorical column. Per-column
    /// failures skip the column; a tripped cost ceiling stops the stage.
    async fn categorical_glossary(
        &self,
        facets: &FacetResults,
        definitions: &BTreeMap<String, ColumnDefinition>,
        hooks: &RunHooks,
    ) -> ApiResult<BTreeMap<String, BTreeMap<String, String>>> {
        let mut glossary = BTreeMap::new();
        if !self.gateway.is_available() {
            return Ok(glossary);
        }

        let mut columns: Vec<(&String, &Vec<String>)> = facets.categorical_values.iter().collect();
        columns.sort_by_key(|(name, _)| name.as_str());

        for (column, values) in columns {
            hooks.check_cancel()?;

            let meaningful = meaningful_values(values);
            if meaningful.is_empty() {
                tracing::debug!("Skipping {}: no meaningful values", column);
                continue;
            }
            if meaningful.len() > GLOSSARY_VALUE_LIMIT {
                tracing::debug!(
                    "Skipping {}: too many unique values ({} > {})",
                    column,
                    meaningful.len(),
                    GLOSSARY_VALUE_LIMIT
                );
                continue;
            }

            let definition = definitions
                .get(column)
                .map(|d| d.definition.as_str())
                .unwrap_or("");
            let prompt = categorical_glossary_prompt(column, definition, &meaningful);

            match self.gateway.call_json(&prompt, Some(GLOSSARY_SYSTEM_PROMPT)).await {
                Ok(response) => {
                    // Accept either {column: {value: def}} or {value: def}
                    let map = match response.get(column.as_str()) {
                        Some(Value::Object(nested)) => nested.clone(),
                        _ => response,
                    };
                    let entries: BTreeMap<String, String> = map
                        .into_iter()
                        .filter_map(|(value, definition)| {
                            definition.as_str().map(|d| (value, d.to_string()))
                        })
                        .collect();
                    if !entries.is_empty() {
                        tracing::info!("Generated {} definitions for {}", entries.len(), column);
                        glossary.insert(column.clone(), entries);
                    }
                }
                Err(e @ ApiError::CostExceeded(_)) => {
                    tracing::warn!("Cost ceiling hit during glossary generation: {}", e);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Glossary generation failed for {}: {}", column, e);
                }
            }
        }

        Ok(glossary)
    }

    // ========================================
    // Stage 5 internals
    // ========================================

    /// Single insights call; a deterministic fallback keeps the required
    /// core populated when the provider is unavailable.
    #[allow(clippy::too_many_arguments)]
    async fn table_insights(
        &self,
        database: &str,
        schema_name: &str,
        table: &str,
        table_schema: &TableSchema,
        sample: &TableSample,
        facets: &FacetResults,
        definitions: &BTreeMap<String, ColumnDefinition>,
        sections: &crate::models::metadata::OptionalSections,
    ) -> InsightOutputs {
        if !self.gateway.is_available() {
            return InsightOutputs::fallback(table, schema_name);
        }

        let mut column_types = serde_json::Map::new();
        for column in &table_schema.columns {
            column_types.insert(column.name.clone(), Value::from(column.data_type.clone()));
        }
        let definitions_json = serde_json::to_value(definitions).unwrap_or(Value::Null);

        let prompt = table_insights_prompt(
            database,
            schema_name,
            table,
            &column_types,
            &facets.constraints.primary_keys,
            &sample.rows,
            &definitions_json,
            sections,
        );

        match self.gateway.call_json(&prompt, Some(INSIGHTS_SYSTEM_PROMPT)).await {
            Ok(response) => InsightOutputs::from_response(response, table, schema_name, sections),
            Err(e) => {
                tracing::warn!("Failed to generate table insights via LLM: {}", e);
                InsightOutputs::fallback(table, schema_name)
            }
        }
    }
}

// ============================================================================
// Stage 5 output carrier
// ============================================================================

struct InsightOutputs {
    insights: TableInsights,
    relationships: Option<Value>,
    business_rules: Option<Value>,
    aggregation_rules: Option<Value>,
    performance_optimization: Option<Value>,
    query_examples: Option<Value>,
    additional_insights: Option<Value>,
}

impl InsightOutputs {
    /// Deterministic placeholder used whenever the LLM path fails
    fn fallback(table: &str, schema_name: &str) -> Self {
        let pretty = title_case(table);
        let spoken = crate::utils::humanize(table);
        Self {
            insights: TableInsights {
                domain: "Business Data".to_string(),
                category: "Data Table".to_string(),
                description: format!(
                    "**{}**\n\nData storage table for {} information in the {} schema.",
                    pretty, spoken, schema_name
                ),
                purpose: format!(
                    "To store and manage {} data for business operations.",
                    spoken
                ),
                usage_patterns: vec![
                    "Data storage and retrieval".to_string(),
                    "Analytics and reporting".to_string(),
                    "Application data management".to_string(),
                ],
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
            performance_optimization: None,
            query_examples: None,
            additional_insights: None,
        }
    }

    /// Lenient extraction: missing core fields take fallback values, and
    /// optional subdocuments are honored only when their flag is on.
    fn from_response(
        response: serde_json::Map<String, Value>,
        table: &str,
        schema_name: &str,
        sections: &crate::models::metadata::OptionalSections,
    ) -> Self {
        let fallback = Self::fallback(table, schema_name);
        let core = match response.get("table_insights") {
            Some(Value::Object(core)) => core.clone(),
            _ => serde_json::Map::new(),
        };

        let lifecycle = match core.get("data_lifecycle") {
            Some(Value::Object(lc)) => DataLifecycle {
                update_frequency: str_field(lc, "update_frequency")
                    .unwrap_or_else(|| "Unknown".to_string()),
                retention_policy: str_field(lc, "retention_policy")
                    .unwrap_or_else(|| "Not specified".to_string()),
                archival_strategy: str_field(lc, "archival_strategy")
                    .unwrap_or_else(|| "Not defined".to_string()),
            },
            _ => fallback.insights.data_lifecycle.clone(),
        };

        let insights = TableInsights {
            domain: str_field(&core, "domain").unwrap_or(fallback.insights.domain),
            category: str_field(&core, "category").unwrap_or(fallback.insights.category),
            description: str_field(&core, "description").unwrap_or(fallback.insights.description),
            purpose: str_field(&core, "purpose").unwrap_or(fallback.insights.purpose),
            usage_patterns: {
                let patterns = string_list(core.get("usage_patterns"));
                if patterns.is_empty() { fallback.insights.usage_patterns } else { patterns }
            },
            data_lifecycle: lifecycle,
            special_handling: string_list(core.get("special_handling")),
            data_quality_recommendations: string_list(core.get("data_quality_recommendations")),
        };

        let section = |enabled: bool, key: &str| -> Option<Value> {
            if enabled { response.get(key).cloned() } else { None }
        };

        Self {
            insights,
            relationships: section(sections.relationships, "potential_relationships"),
            business_rules: section(sections.business_rules, "business_rules"),
            aggregation_rules: section(sections.aggregation_rules, "aggregation_rules"),
            performance_optimization: section(sections.query_rules, "performance_optimization"),
            query_examples: section(sections.query_examples, "query_examples"),
            additional_insights: section(sections.additional_insights, "additional_insights"),
        }
    }
}

// ============================================================================
// Stage 6: assembly
// ============================================================================

struct AssembleInput<'a> {
    database: &'a str,
    schema: &'a str,
    table: &'a str,
    table_schema: &'a TableSchema,
    sample: &'a TableSample,
    classifications: &'a HashMap<String, ColumnClassification>,
    facets: &'a FacetResults,
    definitions: BTreeMap<String, ColumnDefinition>,
    categorical_definitions: Option<BTreeMap<String, BTreeMap<String, String>>>,
    insights: InsightOutputs,
    indexes: Vec<crate::models::metadata::IndexInfo>,
    partition_info: Option<PartitionInfo>,
    row_count: Option<i64>,
    options: &'a GenerateOptions,
    started_at: chrono::DateTime<Utc>,
    steps: Vec<StepStat>,
    total_duration_ms: u64,
    cost_at_start: CostSnapshot,
    cost_at_end: CostSnapshot,
}

fn assemble_document(input: AssembleInput<'_>) -> MetadataDocument {
    let sections = &input.options.sections;
    let mut columns = BTreeMap::new();

    for column in &input.table_schema.columns {
        let classification = input
            .classifications
            .get(&column.name)
            .copied()
            .unwrap_or(ColumnClassification::Other);
        let definition = input
            .definitions
            .get(&column.name)
            .cloned()
            .unwrap_or_else(|| fallback_definition(column));

        columns.insert(
            column.name.clone(),
            ColumnMetadata {
                name: column.name.clone(),
                data_type: column.data_type.clone(),
                is_nullable: column.is_nullable,
                description: definition.definition.clone(),
                original_description: column.comment.clone(),
                business_name: definition.business_name,
                purpose: definition.purpose,
                format: definition.format,
                business_rules: definition.business_rules,
                definition_source: definition.source,
                classification,
                statistics: if classification == ColumnClassification::Numerical {
                    input.facets.numeric_stats.get(&column.name).cloned()
                } else {
                    None
                },
                data_quality: if sections.data_quality {
                    input.facets.quality.get(&column.name).cloned()
                } else {
                    None
                },
                categorical_values: input.facets.categorical_values.get(&column.name).cloned(),
                numeric_precision: column.numeric_precision,
                numeric_scale: column.numeric_scale,
                character_maximum_length: column.character_maximum_length,
            },
        );
    }

    let tokens_used = input.cost_at_end.total_tokens - input.cost_at_start.total_tokens;
    let cost_used = input.cost_at_end.total_cost_usd - input.cost_at_start.total_cost_usd;
    let requests = input.cost_at_end.request_count - input.cost_at_start.request_count;

    let processing_stats = ProcessingStats {
        start_time: input.started_at,
        end_time: Some(Utc::now()),
        total_duration_ms: input.total_duration_ms,
        steps: input.steps,
        optional_sections: *sections,
        sampling_method: Some(input.sample.method),
        total_tokens: tokens_used.max(0),
        llm_request_count: requests.max(0),
        estimated_cost_usd: cost_used.max(0.0),
    };

    // Enabled-but-failed optional sections surface as their empty shape;
    // disabled sections are omitted entirely.
    let gated = |enabled: bool, value: Option<Value>, empty: Value| -> Option<Value> {
        if enabled { Some(value.unwrap_or(empty)) } else { None }
    };

    MetadataDocument {
        database_name: input.database.to_string(),
        schema_name: input.schema.to_string(),
        table_name: input.table.to_string(),
        description: input.insights.insights.description.clone(),
        columns,
        constraints: input.facets.constraints.clone(),
        indexes: input.indexes,
        row_count: input.row_count,
        partition_info: input.partition_info,
        relationships: gated(sections.relationships, input.insights.relationships, json!([])),
        business_rules: gated(sections.business_rules, input.insights.business_rules, json!({})),
        aggregation_rules: gated(
            sections.aggregation_rules,
            input.insights.aggregation_rules,
            json!([]),
        ),
        query_rules: gated(
            sections.query_rules,
            input.insights.performance_optimization,
            json!({}),
        ),
        query_examples: gated(sections.query_examples, input.insights.query_examples, json!([])),
        additional_insights: gated(
            sections.additional_insights,
            input.insights.additional_insights,
            json!({}),
        ),
        categorical_definitions: input.categorical_definitions,
        data_quality: if sections.data_quality {
            Some(TableDataQuality {
                sample_analyzed: input.sample.row_count(),
                recommendations: input
                    .insights
                    .insights
                    .data_quality_recommendations
                    .clone(),
            })
        } else {
            None
        },
        table_insights: input.insights.insights,
        processing_stats,
        generated_at: Utc::now(),
    }
}

// ============================================================================
// Definition strategy rules
// ============================================================================

static SELF_EXPLANATORY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Standard ID columns
        r"^id$", r"_id$", r"_key$", r"^key$",
        // Common timestamp columns
        r"^created_at$", r"^updated_at$", r"^deleted_at$", r"^timestamp$",
        r"^created_time$", r"^updated_time$", r"^modified_time$",
        // Common status/flag columns
        r"^status$", r"^is_", r"^has_", r"^flag$", r"_flag$",
        // Common count/number columns
        r"^count$", r"_count$", r"^num_", r"^number$", r"_number$",
        // Common name/title columns
        r"^name$", r"^title$", r"^description$", r"_name$", r"_title$",
        // Common date/time columns
        r"^date$", r"^time$", r"_date$", r"_time$",
        // Version/sequence columns
        r"^version$", r"^sequence$", r"_version$", r"_sequence$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("self-explanatory pattern"))
    .collect()
});

const GENERIC_TERMS: &[&str] = &[
    "column", "field", "data", "value", "information", "stores", "contains", "holds",
    "represents",
];

/// Columns whose name alone justifies a templated definition
pub fn is_self_explanatory(column_name: &str) -> bool {
    let lower = column_name.to_lowercase();
    SELF_EXPLANATORY_PATTERNS.iter().any(|p| p.is_match(&lower))
}

/// An engine-supplied description is sufficient when it is long enough,
/// not dominated by generic filler, and not merely echoing the name.
pub fn description_sufficient(column_name: &str, description: &str) -> bool {
    let trimmed = description.trim();
    if trimmed.len() < 20 {
        return false;
    }

    let lower = trimmed.to_lowercase();
    let generic_count = GENERIC_TERMS.iter().filter(|t| lower.contains(*t)).count();
    if generic_count >= 2 {
        return false;
    }

    let column_words: std::collections::HashSet<String> = column_name
        .to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .map(|w| w.to_string())
        .collect();
    let desc_words: std::collections::HashSet<String> = lower
        .replace('_', " ")
        .split_whitespace()
        .map(|w| w.to_string())
        .collect();
    let overlap = column_words.intersection(&desc_words).count();
    if !column_words.is_empty() && overlap >= column_words.len() && desc_words.len() <= column_words.len() + 2 {
        return false;
    }

    true
}

/// Templated definition per self-explanatory name family
fn pattern_definition(column: &ColumnInfo) -> ColumnDefinition {
    let name = column.name.to_lowercase();
    let definition = if name == "id" || name.ends_with("_id") {
        format!(
            "Unique identifier for {}",
            crate::utils::humanize(name.trim_end_matches("_id")).trim()
        )
    } else if name.starts_with("is_") || name.starts_with("has_") {
        format!("Boolean flag indicating {}", crate::utils::humanize(&name))
    } else if name.ends_with("_date") || name.ends_with("_time") || name.ends_with("_at") {
        let stem = name
            .trim_end_matches("_date")
            .trim_end_matches("_time")
            .trim_end_matches("_at");
        format!("Date/time when {}", crate::utils::humanize(stem).trim())
    } else if name.ends_with("_count") || name.starts_with("num_") {
        let stem = name.trim_end_matches("_count").trim_start_matches("num_");
        format!("Count of {}", crate::utils::humanize(stem).trim())
    } else {
        format!("The {} value", crate::utils::humanize(&name))
    };

    ColumnDefinition {
        business_name: title_case(&column.name),
        purpose: definition.clone(),
        definition,
        format: "Standard format".to_string(),
        business_rules: Vec::new(),
        source: DefinitionSource::PatternBased,
    }
}

/// Minimal definition when every other strategy failed
fn fallback_definition(column: &ColumnInfo) -> ColumnDefinition {
    ColumnDefinition {
        definition: format!("Column {} of type {}", column.name, column.data_type),
        business_name: title_case(&column.name),
        purpose: format!("Data field for {}", column.name),
        format: "Standard format".to_string(),
        business_rules: Vec::new(),
        source: DefinitionSource::Fallback,
    }
}

fn str_field(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_explanatory_patterns_match() {
        assert!(is_self_explanatory("id"));
        assert!(is_self_explanatory("user_id"));
        assert!(is_self_explanatory("created_at"));
        assert!(is_self_explanatory("is_active"));
        assert!(is_self_explanatory("order_count"));
        assert!(is_self_explanatory("event_date"));
        assert!(!is_self_explanatory("merchandising_strategy"));
    }

    #[test]
    fn short_descriptions_are_insufficient() {
        assert!(!description_sufficient("region", "region info"));
    }

    #[test]
    fn generic_descriptions_are_insufficient() {
        assert!(!description_sufficient(
            "region",
            "This field stores data value information for records"
        ));
    }

    #[test]
    fn substantive_descriptions_are_sufficient() {
        assert!(description_sufficient(
            "region",
            "Sales territory grouping used for quota assignment and reporting rollups"
        ));
    }

    #[test]
    fn echoing_the_column_name_is_insufficient() {
        assert!(!description_sufficient("customer_name", "The customer name"));
    }

    #[test]
    fn pattern_definitions_follow_name_families() {
        let id = pattern_definition(&ColumnInfo::new("account_id", "bigint"));
        assert_eq!(id.definition, "Unique identifier for account");
        assert_eq!(id.source, DefinitionSource::PatternBased);

        let flag = pattern_definition(&ColumnInfo::new("is_active", "boolean"));
        assert!(flag.definition.starts_with("Boolean flag"));

        let at = pattern_definition(&ColumnInfo::new("shipped_at", "timestamp"));
        assert_eq!(at.definition, "Date/time when shipped");

        let count = pattern_definition(&ColumnInfo::new("retry_count", "integer"));
        assert_eq!(count.definition, "Count of retry");
    }

    #[test]
    fn fallback_definition_names_type() {
        let def = fallback_definition(&ColumnInfo::new("payload", "jsonb"));
        assert_eq!(def.definition, "Column payload of type jsonb");
        assert_eq!(def.source, DefinitionSource::Fallback);
    }
}
