//! Prompt builders
//!
//! Prompts are engineered for structured JSON output, not determinism.
//! Each builder receives only the facts the call needs; anything bulky
//! (sample data, value lists) is truncated before it reaches the prompt.

use serde_json::json;
use std::collections::HashMap;

use crate::models::metadata::{
    ColumnInfo, Constraints, NumericStats, OptionalSections, PartitionInfo, SampleRow,
};

pub const COLUMN_SYSTEM_PROMPT: &str = "You are an expert database analyst who specializes in \
creating clear and accurate metadata documentation. Focus on providing meaningful, value-added \
descriptions that enhance understanding without redundancy.";

pub const GLOSSARY_SYSTEM_PROMPT: &str = "You are an expert data analyst who specializes in \
creating clear and accurate metadata documentation.";

pub const INSIGHTS_SYSTEM_PROMPT: &str = "You are an expert data architect and business analyst \
who specializes in understanding database schemas, their business implications, and operational \
requirements. You provide comprehensive, actionable insights about data structures.";

/// Facts available when describing columns
pub struct ColumnPromptContext<'a> {
    pub database: &'a str,
    pub schema: &'a str,
    pub table: &'a str,
    pub constraints: &'a Constraints,
    pub partition_info: Option<&'a PartitionInfo>,
    pub categorical_values: &'a HashMap<String, Vec<String>>,
    pub numeric_stats: &'a HashMap<String, NumericStats>,
}

/// One batched prompt covering every column that needs LLM enhancement
pub fn column_definitions_prompt(ctx: &ColumnPromptContext, columns: &[&ColumnInfo]) -> String {
    let mut prompt = format!(
        "### Task\n\
         Generate meaningful business definitions for specific columns that need enhancement.\n\n\
         ### Database Context\n\
         Database: {}\n\
         Schema: {}\n\
         Table: {}\n\n\
         ### Columns Requiring Enhancement\n",
        ctx.database, ctx.schema, ctx.table
    );

    let partition_column = ctx.partition_info.and_then(|p| p.partition_column.as_deref());
    let clustering_fields: Vec<&str> = ctx
        .partition_info
        .map(|p| p.clustering_fields.iter().map(|f| f.as_str()).collect())
        .unwrap_or_default();

    for column in columns {
        prompt.push_str(&format!("\n## Column: {}\n", column.name));
        prompt.push_str(&format!("Data Type: {}\n", column.data_type));
        if let Some(comment) = &column.comment {
            prompt.push_str(&format!("Existing Description: {}\n", comment));
        }
        prompt.push_str(&format!(
            "Column Mode: {}\n",
            if column.is_nullable { "NULLABLE" } else { "REQUIRED" }
        ));
        if let Some(precision) = column.numeric_precision {
            prompt.push_str(&format!("Numeric Precision: {}\n", precision));
        }
        if let Some(scale) = column.numeric_scale {
            prompt.push_str(&format!("Numeric Scale: {}\n", scale));
        }

        let is_primary = ctx.constraints.primary_keys.iter().any(|pk| pk == &column.name);
        prompt.push_str(&format!("Primary Key: {}\n", if is_primary { "Yes" } else { "No" }));

        if partition_column == Some(column.name.as_str()) {
            prompt.push_str("Partition Column: Yes (Table is partitioned by this column)\n");
        }
        if clustering_fields.contains(&column.name.as_str()) {
            prompt.push_str("Clustering Field: Yes (Table is clustered by this column)\n");
        }

        if let Some(values) = ctx.categorical_values.get(&column.name) {
            let mut rendered = values.iter().take(10).cloned().collect::<Vec<_>>().join(", ");
            if values.len() > 10 {
                rendered.push_str(&format!(", ... (and {} more values)", values.len() - 10));
            }
            prompt.push_str(&format!("Sample Values: {}\n", rendered));
        }

        if let Some(stats) = ctx.numeric_stats.get(&column.name) {
            prompt.push_str(&format!(
                "Min: {}, Max: {}, Mean: {}, Median: {}\n",
                stats.min, stats.max, stats.mean, stats.median
            ));
        }
    }

    prompt.push_str(
        "\n### Instructions\n\
         Focus on providing meaningful, value-added business definitions for these columns.\n\n\
         **Guidelines:**\n\
         1. If an \"Existing Description\" is provided and it's comprehensive, use it as-is by copying it to the \"definition\" field\n\
         2. Only enhance descriptions that are generic, incomplete, or lack business context\n\
         3. Provide concise, actionable business definitions that add real value\n\
         4. Avoid redundant information that's already obvious from the column name\n\
         5. Focus on business context, usage patterns, and domain-specific meaning\n\n\
         Format your response as a structured JSON with column names as keys, like this:\n\
         {\n\
           \"column_name\": {\n\
             \"definition\": \"Business definition here\",\n\
             \"business_name\": \"Human-readable name (max 3 words)\",\n\
             \"purpose\": \"Purpose here\",\n\
             \"format\": \"Expected format\",\n\
             \"business_rules\": [\"rule 1\", \"rule 2\"]\n\
           }\n\
         }\n\n\
         Ensure the output is valid JSON that can be parsed programmatically.\n",
    );

    prompt
}

/// Per-column glossary prompt: value -> short definition
pub fn categorical_glossary_prompt(column: &str, definition: &str, values: &[String]) -> String {
    format!(
        "Analyze these categorical values for the column '{column}' and provide concise \
         definitions only if the values represent meaningful categories or states that benefit \
         from explanation.\n\n\
         Column Name: {column}\n\
         Column Description: {definition}\n\
         Values: {values}\n\n\
         Rules:\n\
         1. Only define values that represent meaningful categories or states\n\
         2. Skip obvious numerical or date values\n\
         3. Keep definitions concise (max 15 words)\n\
         4. Skip values that are self-explanatory\n\
         5. Focus on business or domain-specific terminology\n\n\
         Return the definitions in this JSON format:\n\
         {{\n  \"value1\": \"definition1\",\n  \"value2\": \"definition2\"\n}}\n\n\
         Only include values that truly need definition. If no values need definition, return \
         an empty object.",
        column = column,
        definition = definition,
        values = values.join(", "),
    )
}

/// The single table-insights prompt; optional sections extend both the
/// instruction list and the response skeleton.
#[allow(clippy::too_many_arguments)]
pub fn table_insights_prompt(
    database: &str,
    schema_name: &str,
    table: &str,
    column_types: &serde_json::Map<String, serde_json::Value>,
    primary_keys: &[String],
    sample_rows: &[SampleRow],
    column_definitions: &serde_json::Value,
    sections: &OptionalSections,
) -> String {
    let sample_slice: Vec<&SampleRow> = sample_rows.iter().take(2).collect();

    let mut prompt = format!(
        "### Task\n\
         Provide a comprehensive analysis of this database table including domain \
         classification, business context, and operational insights.\n\n\
         ### Database Context\n\
         Database: {}\n\
         Schema: {}\n\
         Table: {}\n\n\
         ### Table Information\n\
         Columns:\n{}\n\n\
         Primary Keys:\n{}\n\n\
         Sample Data:\n{}\n\n\
         ### Column Definitions\n{}\n\n\
         ### Instructions\n\
         Analyze the table comprehensively and provide structured insights covering business \
         context, operational aspects, and technical recommendations.\n\n\
         Required sections:\n\
         1. Domain classification (e.g., \"Geospatial & Location\", \"Data Analytics\", \"User Management\", \"Financial\", \"Product Catalog\", etc.)\n\
         2. Category classification (e.g., \"Master Data\", \"Transactional Data\", \"Reference Data\", \"Configuration Data\", etc.)\n\
         3. Comprehensive description in Markdown format with business context and technical details\n\
         4. Clear business purpose statement\n\
         5. Common usage patterns and use cases\n\
         6. Data lifecycle considerations including update frequency, retention, and archival strategies\n",
        database,
        schema_name,
        table,
        serde_json::to_string_pretty(column_types).unwrap_or_default(),
        if primary_keys.is_empty() { "None".to_string() } else { primary_keys.join(", ") },
        serde_json::to_string_pretty(&sample_slice).unwrap_or_default(),
        serde_json::to_string_pretty(column_definitions).unwrap_or_default(),
    );

    let mut optional = Vec::new();
    if sections.relationships {
        optional.push("7. Potential relationships with other tables");
    }
    if sections.business_rules {
        optional.push("8. Recommended business rules and data quality validations");
    }
    if sections.aggregation_rules {
        optional.push("9. Suggested aggregation rules for analytics and reporting");
    }
    if sections.query_rules {
        optional.push("10. Query optimization rules and performance recommendations");
    }
    if sections.query_examples {
        optional.push("11. Example SQL queries for common use cases");
    }
    if sections.additional_insights {
        optional.push("12. Additional domain-specific insights and recommendations");
    }
    if !optional.is_empty() {
        prompt.push_str("\nOptional sections (include if relevant):\n");
        prompt.push_str(&optional.join("\n"));
        prompt.push('\n');
    }

    let mut structure = json!({
        "table_insights": {
            "domain": "Domain of the table (e.g., 'Geospatial & Location', 'Data Analytics', 'User Management')",
            "category": "Category of the table",
            "description": "high level description in Markdown format",
            "purpose": "Clear statement of the table's business purpose and function",
            "usage_patterns": [
                "Common usage pattern 1",
                "Common usage pattern 2",
                "Common usage pattern 3"
            ],
            "data_lifecycle": {
                "update_frequency": "How often the data is updated (e.g., 'Real-time', 'Daily', 'Weekly', 'On-demand')",
                "retention_policy": "Data retention policy and duration (e.g., '7 years', 'Indefinite', '90 days')",
                "archival_strategy": "Data archival strategy and considerations"
            }
        }
    });

    if sections.relationships {
        structure["potential_relationships"] = json!([
            {
                "column": "column_name",
                "relates_to": "likely related table",
                "relationship_type": "one-to-many/many-to-one/many-to-many",
                "description": "description of relationship and business logic"
            }
        ]);
    }
    if sections.business_rules {
        structure["business_rules"] = json!({
            "data_quality_rules": ["Data quality rule 1", "Data quality rule 2"],
            "business_constraints": ["Business constraint 1", "Business constraint 2"],
            "validation_recommendations": ["Validation recommendation 1", "Validation recommendation 2"]
        });
    }
    if sections.aggregation_rules {
        structure["aggregation_rules"] = json!([
            {
                "rule_name": "aggregation rule name",
                "description": "what this aggregation represents",
                "sql_pattern": "SQL pattern for aggregation",
                "use_case": "when to use this aggregation",
                "business_value": "business value provided"
            }
        ]);
    }
    if sections.query_rules {
        structure["performance_optimization"] = json!({
            "indexing_recommendations": ["Index recommendation 1", "Index recommendation 2"],
            "query_patterns": ["Optimal query pattern 1", "Optimal query pattern 2"],
            "performance_considerations": ["Performance consideration 1", "Performance consideration 2"]
        });
    }
    if sections.query_examples {
        structure["query_examples"] = json!([
            {
                "name": "example query name",
                "description": "what this query accomplishes",
                "sql": "SELECT example SQL query",
                "use_case": "business use case for this query",
                "frequency": "how often this query might be run"
            }
        ]);
    }
    if sections.additional_insights {
        structure["additional_insights"] = json!({
            "data_patterns": "Observed data patterns and characteristics",
            "domain_specific_notes": "Domain-specific observations and recommendations",
            "integration_considerations": "Integration and interoperability considerations",
            "governance_notes": "Data governance and compliance considerations"
        });
    }

    prompt.push_str(&format!(
        "\n### Response Format\n\
         Provide your analysis as a structured JSON response following this exact format:\n\n{}\n\n\
         ### Important Guidelines\n\
         1. Ensure all text fields are properly formatted and professional\n\
         2. Use Markdown formatting in the description field for better readability\n\
         3. Be specific and actionable in recommendations\n\
         4. Consider the business context when classifying domain and category\n\
         5. Ensure the output is valid JSON that can be parsed programmatically\n\
         6. Base insights on the actual data structure and sample data provided\n",
        serde_json::to_string_pretty(&structure).unwrap_or_default()
    ));

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metadata::ColumnInfo;

    #[test]
    fn column_prompt_includes_context() {
        let constraints = Constraints {
            primary_keys: vec!["order_ref".to_string()],
            ..Default::default()
        };
        let mut categorical = HashMap::new();
        categorical.insert(
            "order_ref".to_string(),
            vec!["A1".to_string(), "B2".to_string()],
        );
        let stats = HashMap::new();
        let ctx = ColumnPromptContext {
            database: "shop",
            schema: "public",
            table: "orders",
            constraints: &constraints,
            partition_info: None,
            categorical_values: &categorical,
            numeric_stats: &stats,
        };
        let column = ColumnInfo::new("order_ref", "varchar");
        let prompt = column_definitions_prompt(&ctx, &[&column]);
        assert!(prompt.contains("## Column: order_ref"));
        assert!(prompt.contains("Primary Key: Yes"));
        assert!(prompt.contains("Sample Values: A1, B2"));
    }

    #[test]
    fn insights_prompt_gates_optional_sections() {
        let columns = serde_json::Map::new();
        let all_off = OptionalSections::none();
        let prompt = table_insights_prompt(
            "db",
            "main",
            "t",
            &columns,
            &[],
            &[],
            &serde_json::json!({}),
            &all_off,
        );
        assert!(!prompt.contains("potential_relationships"));
        assert!(!prompt.contains("aggregation_rules"));

        let all_on = OptionalSections::default();
        let prompt = table_insights_prompt(
            "db",
            "main",
            "t",
            &columns,
            &[],
            &[],
            &serde_json::json!({}),
            &all_on,
        );
        assert!(prompt.contains("potential_relationships"));
        assert!(prompt.contains("query_examples"));
    }
}
