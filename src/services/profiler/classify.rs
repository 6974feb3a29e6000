// Column classification: numerical / categorical / other
//
// Declared type wins when it is unambiguous; otherwise a bounded probe of
// the sampled values decides.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::models::metadata::{ColumnClassification, TableSample, TableSchema};

use super::as_number;

/// Values probed per column when the declared type is ambiguous
const PROBE_LIMIT: usize = 100;
/// Unique-ratio ceiling for categorical classification
const CATEGORICAL_UNIQUE_RATIO: f64 = 0.03;
/// Share of probe values that must coerce to numeric
const NUMERIC_COERCION_RATIO: f64 = 0.8;
/// Long-text guard: average length above this is never categorical
const LONG_TEXT_AVG_LEN: f64 = 100.0;

static NUMERIC_TYPES: &[&str] =
    &["int", "float", "double", "decimal", "numeric", "real", "number", "serial"];

static CATEGORICAL_NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)_id$",
        r"(?i)_code$",
        r"(?i)^status$",
        r"(?i)_status$",
        r"(?i)_type$",
        r"(?i)_flag$",
        r"(?i)^is_",
        r"(?i)^has_",
        r"(?i)_date$",
        r"(?i)_time$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("classification pattern"))
    .collect()
});

/// Classify every schema column against the sample
pub fn classify_columns(
    schema: &TableSchema,
    sample: &TableSample,
) -> HashMap<String, ColumnClassification> {
    let mut result = HashMap::new();
    for column in &schema.columns {
        let classification = classify_column(&column.name, &column.data_type, sample);
        tracing::debug!("Column '{}' classified as {:?}", column.name, classification);
        result.insert(column.name.clone(), classification);
    }
    result
}

fn classify_column(name: &str, declared_type: &str, sample: &TableSample) -> ColumnClassification {
    let declared = declared_type.to_lowercase();

    if NUMERIC_TYPES.iter().any(|t| declared.contains(t)) {
        return ColumnClassification::Numerical;
    }

    let non_null: Vec<&serde_json::Value> = sample
        .column_values(name)
        .filter(|v| !v.is_null())
        .take(PROBE_LIMIT)
        .collect();

    // Empty columns carry no signal; treat as categorical like the
    // low-cardinality case
    if non_null.is_empty() {
        return ColumnClassification::Categorical;
    }

    let numeric_count = non_null.iter().filter(|v| as_number(v).is_some()).count();
    if numeric_count as f64 / non_null.len() as f64 >= NUMERIC_COERCION_RATIO {
        return ColumnClassification::Numerical;
    }

    let rendered: Vec<String> = non_null.iter().map(|v| render(v)).collect();
    let unique: HashSet<&String> = rendered.iter().collect();
    let unique_ratio = unique.len() as f64 / rendered.len() as f64;

    // Long free-text columns are never categorical
    let avg_len = rendered.iter().map(|s| s.len()).sum::<usize>() as f64 / rendered.len() as f64;
    if avg_len > LONG_TEXT_AVG_LEN && unique_ratio >= 0.99 {
        return ColumnClassification::Other;
    }

    if unique_ratio <= CATEGORICAL_UNIQUE_RATIO
        || unique.len() <= 1
        || CATEGORICAL_NAME_PATTERNS.iter().any(|p| p.is_match(name))
        || is_boolean_like(&rendered)
    {
        return ColumnClassification::Categorical;
    }

    // Short enumerable string domains still count as categorical
    if unique.len() <= 10 {
        return ColumnClassification::Categorical;
    }

    ColumnClassification::Other
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_boolean_like(values: &[String]) -> bool {
    values.iter().all(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "true" | "false" | "t" | "f" | "yes" | "no" | "y" | "n" | "0" | "1"
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metadata::{ColumnInfo, SampleRow, SamplingMethod};
    use serde_json::json;

    fn sample_of(column: &str, values: Vec<serde_json::Value>) -> TableSample {
        let rows = values
            .into_iter()
            .map(|v| {
                let mut row = SampleRow::new();
                row.insert(column.to_string(), v);
                row
            })
            .collect();
        TableSample { columns: vec![column.to_string()], rows, method: SamplingMethod::Full }
    }

    fn schema_of(column: &str, ty: &str) -> TableSchema {
        TableSchema { columns: vec![ColumnInfo::new(column, ty)] }
    }

    #[test]
    fn declared_numeric_types_win() {
        let sample = sample_of("amount", vec![json!("abc")]);
        let result = classify_columns(&schema_of("amount", "NUMERIC(10,2)"), &sample);
        assert_eq!(result["amount"], ColumnClassification::Numerical);
    }

    #[test]
    fn numeric_strings_classify_numerical() {
        let values = (0..50).map(|i| json!(format!("{}.5", i))).collect();
        let sample = sample_of("score", values);
        let result = classify_columns(&schema_of("score", "text"), &sample);
        assert_eq!(result["score"], ColumnClassification::Numerical);
    }

    #[test]
    fn low_cardinality_strings_classify_categorical() {
        let values = (0..60)
            .map(|i| json!(if i % 3 == 0 { "open" } else { "closed" }))
            .collect();
        let sample = sample_of("state", values);
        let result = classify_columns(&schema_of("state", "varchar"), &sample);
        assert_eq!(result["state"], ColumnClassification::Categorical);
    }

    #[test]
    fn name_patterns_classify_categorical() {
        let values = (0..10).map(|i| json!(format!("u{}", i))).collect();
        let sample = sample_of("country_code", values);
        let result = classify_columns(&schema_of("country_code", "varchar"), &sample);
        assert_eq!(result["country_code"], ColumnClassification::Categorical);
    }

    #[test]
    fn long_unique_text_is_other() {
        let values = (0..40)
            .map(|i| json!(format!("{} {}", "lorem ipsum dolor sit amet ".repeat(5), i)))
            .collect();
        let sample = sample_of("body", values);
        let result = classify_columns(&schema_of("body", "text"), &sample);
        assert_eq!(result["body"], ColumnClassification::Other);
    }

    #[test]
    fn empty_column_is_categorical() {
        let sample = sample_of("ghost", vec![json!(null), json!(null)]);
        let result = classify_columns(&schema_of("ghost", "varchar"), &sample);
        assert_eq!(result["ghost"], ColumnClassification::Categorical);
    }
}
