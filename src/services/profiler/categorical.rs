// Categorical value extraction
//
// Small tables get a direct DISTINCT against the source; large tables
// derive values from the sample. Lists are capped at 100 values.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::models::metadata::TableSample;
use crate::services::db::DatabaseHandler;
use crate::utils::{ApiResult, ensure_safe_identifier};

/// Hard cap on stored categorical values per column
pub const MAX_CATEGORICAL_VALUES: usize = 100;
/// Above this row count, DISTINCT is too expensive; use the sample
const DISTINCT_ROW_LIMIT: i64 = 100_000;

static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^\d{4}-\d{2}-\d{2}",
        r"^\d{2}/\d{2}/\d{4}",
        r"^\d{2}-\d{2}-\d{4}",
        r"^\d{4}/\d{2}/\d{2}",
        r"(?i)^(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]* \d{1,2},? \d{4}",
        r"(?i)^\d{1,2} (Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]* \d{4}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("date pattern"))
    .collect()
});

pub fn is_date_like(value: &str) -> bool {
    DATE_PATTERNS.iter().any(|p| p.is_match(value))
}

pub fn looks_numeric(value: &str) -> bool {
    !value.is_empty() && value.trim().parse::<f64>().is_ok()
}

/// Distinct values per categorical column, keyed by column name.
/// Columns whose extraction fails fall back to the sample; columns with no
/// observed values are omitted.
pub async fn extract_categorical_values(
    handler: &dyn DatabaseHandler,
    schema: &str,
    table: &str,
    sample: &TableSample,
    categorical_columns: &[String],
    row_count: Option<i64>,
) -> ApiResult<HashMap<String, Vec<String>>> {
    let mut values = HashMap::new();
    let use_distinct = matches!(row_count, Some(n) if n <= DISTINCT_ROW_LIMIT);

    for column in categorical_columns {
        if ensure_safe_identifier(column).is_err() {
            tracing::warn!("Skipping categorical column with unsafe name: {}", column);
            continue;
        }

        let mut column_values = if use_distinct {
            match distinct_values(handler, schema, table, column).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(
                        "DISTINCT extraction failed for column {}: {}; using sample",
                        column,
                        e
                    );
                    sample_values(sample, column)
                }
            }
        } else {
            sample_values(sample, column)
        };

        column_values.truncate(MAX_CATEGORICAL_VALUES);
        if !column_values.is_empty() {
            tracing::debug!("Extracted {} values for column {}", column_values.len(), column);
            values.insert(column.clone(), column_values);
        }
    }

    Ok(values)
}

async fn distinct_values(
    handler: &dyn DatabaseHandler,
    schema: &str,
    table: &str,
    column: &str,
) -> ApiResult<Vec<String>> {
    let quoted = handler.quote_ident(column);
    let sql = format!(
        "SELECT DISTINCT {} AS value FROM {} WHERE {} IS NOT NULL ORDER BY {} {}",
        quoted,
        handler.table_ref(schema, table),
        quoted,
        quoted,
        handler.limit_clause(MAX_CATEGORICAL_VALUES, 0)
    );
    let rows = handler.fetch_all(&sql, &[]).await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("value"))
        .filter(|v| !v.is_null())
        .map(render)
        .collect())
}

fn sample_values(sample: &TableSample, column: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut values = Vec::new();
    for value in sample.column_values(column) {
        if value.is_null() {
            continue;
        }
        let rendered = render(value);
        if seen.insert(rendered.clone()) {
            values.push(rendered);
        }
        if values.len() >= MAX_CATEGORICAL_VALUES {
            break;
        }
    }
    values
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Values worth sending to glossary generation: date-like and numeric
/// values are noise there, though they stay in the profile itself.
pub fn meaningful_values(values: &[String]) -> Vec<String> {
    values
        .iter()
        .filter(|v| !v.is_empty() && !is_date_like(v) && !looks_numeric(v))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_date_like_values() {
        assert!(is_date_like("2024-01-03"));
        assert!(is_date_like("01/15/2024"));
        assert!(is_date_like("Jan 3, 2024"));
        assert!(!is_date_like("active"));
        assert!(!is_date_like("v2024"));
    }

    #[test]
    fn meaningful_values_drop_dates_and_numbers() {
        let values = vec![
            "active".to_string(),
            "2024-01-03".to_string(),
            "42".to_string(),
            "pending".to_string(),
        ];
        assert_eq!(meaningful_values(&values), vec!["active", "pending"]);
    }
}
