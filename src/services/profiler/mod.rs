// Profiler
// Purpose: derive per-column facts from the sample: classification,
// numeric statistics, quality metrics, categorical values, constraints.
//
// The four facets are independent failure domains and always run
// concurrently; a failed facet degrades to its zero value.

pub mod categorical;
pub mod classify;
pub mod quality;
pub mod stats;

pub use categorical::{MAX_CATEGORICAL_VALUES, is_date_like, looks_numeric, meaningful_values};
pub use classify::classify_columns;
pub use quality::compute_quality_metrics;
pub use stats::compute_numeric_stats;

use std::collections::HashMap;
use std::sync::Arc;

/// Numeric coercion shared by classification, stats, and quality checks.
/// Strings parse when they hold a plain number; anything else is nil.
pub(crate) fn as_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

use crate::models::metadata::{
    ColumnClassification, Constraints, NumericStats, OptionalSections, QualityMetrics,
    TableSample, TableSchema,
};
use crate::services::db::DatabaseHandler;

/// Stage-2 facet outputs; failed facets hold their zero value
#[derive(Debug, Default)]
pub struct FacetResults {
    pub constraints: Constraints,
    pub numeric_stats: HashMap<String, NumericStats>,
    pub quality: HashMap<String, QualityMetrics>,
    pub categorical_values: HashMap<String, Vec<String>>,
}

/// Run the four profiling facets concurrently.
///
/// Data-quality and categorical extraction honor their section flags; the
/// other two always run.
pub async fn profile_facets(
    handler: Arc<dyn DatabaseHandler>,
    schema_name: &str,
    table_name: &str,
    table_schema: &TableSchema,
    sample: &TableSample,
    classifications: &HashMap<String, ColumnClassification>,
    sections: &OptionalSections,
    row_count: Option<i64>,
) -> FacetResults {
    let numerical_columns: Vec<String> = table_schema
        .columns
        .iter()
        .filter(|c| classifications.get(&c.name) == Some(&ColumnClassification::Numerical))
        .map(|c| c.name.clone())
        .collect();
    let categorical_columns: Vec<String> = table_schema
        .columns
        .iter()
        .filter(|c| classifications.get(&c.name) == Some(&ColumnClassification::Categorical))
        .map(|c| c.name.clone())
        .collect();

    let constraints_task = {
        let handler = Arc::clone(&handler);
        let schema = schema_name.to_string();
        let table = table_name.to_string();
        async move {
            match handler.table_constraints(&schema, &table).await {
                Ok(constraints) => constraints,
                Err(e) => {
                    tracing::error!("Constraint extraction failed for {}.{}: {}", schema, table, e);
                    Constraints::default()
                }
            }
        }
    };

    let stats_task = async {
        compute_numeric_stats(sample, &numerical_columns)
    };

    let quality_task = async {
        if sections.data_quality {
            compute_quality_metrics(sample, table_schema)
        } else {
            HashMap::new()
        }
    };

    let categorical_task = {
        let handler = Arc::clone(&handler);
        let schema = schema_name.to_string();
        let table = table_name.to_string();
        let columns = categorical_columns.clone();
        async move {
            if !sections.categorical_definitions {
                return HashMap::new();
            }
            match categorical::extract_categorical_values(
                handler.as_ref(),
                &schema,
                &table,
                sample,
                &columns,
                row_count,
            )
            .await
            {
                Ok(values) => values,
                Err(e) => {
                    tracing::error!(
                        "Categorical extraction failed for {}.{}: {}",
                        schema,
                        table,
                        e
                    );
                    HashMap::new()
                }
            }
        }
    };

    let (constraints, numeric_stats, quality, categorical_values) =
        tokio::join!(constraints_task, stats_task, quality_task, categorical_task);

    FacetResults { constraints, numeric_stats, quality, categorical_values }
}
