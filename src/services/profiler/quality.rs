// Per-column data-quality metrics and rule-derived findings

use std::collections::{HashMap, HashSet};

use crate::models::metadata::{QualityMetrics, TableSample, TableSchema};

use super::as_number;
use super::stats::skewness;

const COMPLETENESS_THRESHOLD: f64 = 95.0;
/// Sample must be at least this large before uniqueness rules fire
const MIN_ROWS_FOR_UNIQUENESS_RULES: usize = 100;
const LOW_CARDINALITY_LIMIT: usize = 5;
const SKEW_THRESHOLD: f64 = 3.0;

static NUMERIC_TYPES: &[&str] =
    &["int", "float", "double", "decimal", "numeric", "real", "number"];

pub fn compute_quality_metrics(
    sample: &TableSample,
    schema: &TableSchema,
) -> HashMap<String, QualityMetrics> {
    let total = sample.row_count();
    let mut metrics = HashMap::new();

    for column in &schema.columns {
        let mut m = QualityMetrics::default();

        if total == 0 {
            metrics.insert(column.name.clone(), m);
            continue;
        }

        let values: Vec<&serde_json::Value> = sample.column_values(&column.name).collect();
        let non_null: Vec<&serde_json::Value> =
            values.iter().copied().filter(|v| !v.is_null()).collect();

        let rendered: HashSet<String> = non_null
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();

        m.completeness = round2(non_null.len() as f64 / total as f64 * 100.0);
        m.uniqueness = round2(rendered.len() as f64 / total as f64 * 100.0);

        if m.completeness < COMPLETENESS_THRESHOLD {
            m.common_issues.push("High percentage of missing values".to_string());
            m.recommendations.push("Investigate source of missing values".to_string());
        }

        if total >= MIN_ROWS_FOR_UNIQUENESS_RULES {
            if rendered.len() == total && m.completeness >= 100.0 {
                m.common_issues.push("Potential primary key".to_string());
                m.recommendations.push("Verify if column should be unique".to_string());
            }
            if !rendered.is_empty() && rendered.len() <= LOW_CARDINALITY_LIMIT {
                let mut observed: Vec<String> = rendered.iter().cloned().collect();
                observed.sort();
                m.common_issues.push("Low cardinality".to_string());
                m.recommendations.push(format!(
                    "Verify if low variation is expected (values: {})",
                    observed.join(", ")
                ));
            }
        }

        let declared = column.data_type.to_lowercase();
        let declared_numeric = NUMERIC_TYPES.iter().any(|t| declared.contains(t));
        if declared_numeric {
            let numbers: Vec<f64> = non_null.iter().filter_map(|v| as_number(v)).collect();
            if numbers.len() < non_null.len() {
                m.common_issues
                    .push("Type mismatch: non-numeric values in a numeric column".to_string());
                m.recommendations
                    .push("Check ingestion for values that fail numeric parsing".to_string());
            }
            if let Some(skew) = skewness(&numbers) {
                if skew.abs() > SKEW_THRESHOLD {
                    m.common_issues.push("Highly skewed distribution".to_string());
                    m.recommendations
                        .push("Consider transformations before aggregating".to_string());
                }
            }
        }

        metrics.insert(column.name.clone(), m);
    }

    metrics
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metadata::{ColumnInfo, SampleRow, SamplingMethod};
    use serde_json::json;

    fn build_sample(column: &str, values: Vec<serde_json::Value>) -> TableSample {
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
    fn empty_sample_reports_zero() {
        let sample = build_sample("c", vec![]);
        let metrics = compute_quality_metrics(&sample, &schema_of("c", "text"));
        assert_eq!(metrics["c"].completeness, 0.0);
        assert_eq!(metrics["c"].uniqueness, 0.0);
        assert!(metrics["c"].common_issues.is_empty());
    }

    #[test]
    fn flags_missing_values() {
        let mut values: Vec<serde_json::Value> = (0..9).map(|i| json!(i)).collect();
        values.push(json!(null));
        let metrics = compute_quality_metrics(&build_sample("c", values), &schema_of("c", "int"));
        assert_eq!(metrics["c"].completeness, 90.0);
        assert!(metrics["c"].common_issues.iter().any(|i| i.contains("missing")));
    }

    #[test]
    fn flags_potential_primary_key_on_large_sample() {
        let values: Vec<serde_json::Value> = (0..100).map(|i| json!(i)).collect();
        let metrics = compute_quality_metrics(&build_sample("id", values), &schema_of("id", "int"));
        assert!(metrics["id"].common_issues.iter().any(|i| i.contains("primary key")));
    }

    #[test]
    fn flags_low_cardinality_with_value_list() {
        let values: Vec<serde_json::Value> =
            (0..100).map(|i| json!(if i % 2 == 0 { "a" } else { "b" })).collect();
        let metrics =
            compute_quality_metrics(&build_sample("flag", values), &schema_of("flag", "text"));
        assert!(metrics["flag"].common_issues.iter().any(|i| i.contains("Low cardinality")));
        assert!(metrics["flag"].recommendations.iter().any(|r| r.contains("a, b")));
    }

    #[test]
    fn flags_type_mismatch() {
        let values = vec![json!(1), json!(2), json!("oops")];
        let metrics =
            compute_quality_metrics(&build_sample("n", values), &schema_of("n", "integer"));
        assert!(metrics["n"].common_issues.iter().any(|i| i.contains("Type mismatch")));
    }

    #[test]
    fn flags_skewed_distribution() {
        let mut values: Vec<serde_json::Value> = (0..99).map(|_| json!(1.0)).collect();
        values.push(json!(1_000_000.0));
        let metrics =
            compute_quality_metrics(&build_sample("amt", values), &schema_of("amt", "double"));
        assert!(metrics["amt"].common_issues.iter().any(|i| i.contains("skewed")));
    }
}
