// Numeric statistics over the sample
//
// Non-numeric values in a numerical column coerce to nil and drop out of
// the computation. A column needs at least two observations to get stats.

use std::collections::HashMap;

use crate::models::metadata::{NumericStats, TableSample};

use super::as_number;

const MIN_OBSERVATIONS: usize = 2;

pub fn compute_numeric_stats(
    sample: &TableSample,
    numerical_columns: &[String],
) -> HashMap<String, NumericStats> {
    let mut stats = HashMap::new();
    for column in numerical_columns {
        let mut values: Vec<f64> = sample
            .column_values(column)
            .filter_map(as_number)
            .filter(|v| v.is_finite())
            .collect();
        if values.len() < MIN_OBSERVATIONS {
            tracing::debug!(
                "Skipping stats for '{}': {} usable observations",
                column,
                values.len()
            );
            continue;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        stats.insert(column.clone(), summarize(&values));
    }
    stats
}

fn summarize(sorted: &[f64]) -> NumericStats {
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);

    NumericStats {
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean,
        median: percentile(sorted, 0.50),
        std_dev: variance.sqrt(),
        p10: percentile(sorted, 0.10),
        p25: percentile(sorted, 0.25),
        p50: percentile(sorted, 0.50),
        p75: percentile(sorted, 0.75),
        p90: percentile(sorted, 0.90),
        p95: percentile(sorted, 0.95),
        p99: percentile(sorted, 0.99),
    }
}

/// Linear interpolation between closest ranks
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = q * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = rank - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

/// Adjusted Fisher-Pearson sample skewness; None below three observations
pub fn skewness(values: &[f64]) -> Option<f64> {
    let n = values.len() as f64;
    if values.len() < 3 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n;
    let m2 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n;
    if m2 <= f64::EPSILON {
        return Some(0.0);
    }
    let g1 = m3 / m2.powf(1.5);
    Some((n * (n - 1.0)).sqrt() / (n - 2.0) * g1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metadata::{SampleRow, SamplingMethod};
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

    #[test]
    fn computes_basic_stats() {
        let sample = sample_of("v", (1..=100).map(|i| json!(i)).collect());
        let stats = compute_numeric_stats(&sample, &["v".to_string()]);
        let s = &stats["v"];
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 100.0);
        assert_eq!(s.mean, 50.5);
        assert_eq!(s.median, 50.5);
        assert!((s.p25 - 25.75).abs() < 1e-9);
        assert!((s.p99 - 99.01).abs() < 1e-9);
    }

    #[test]
    fn coerces_numeric_strings_and_skips_garbage() {
        let sample = sample_of(
            "v",
            vec![json!("1"), json!("2.5"), json!("not a number"), json!(null), json!(4)],
        );
        let stats = compute_numeric_stats(&sample, &["v".to_string()]);
        let s = &stats["v"];
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 4.0);
    }

    #[test]
    fn requires_two_observations() {
        let sample = sample_of("v", vec![json!(1), json!(null)]);
        let stats = compute_numeric_stats(&sample, &["v".to_string()]);
        assert!(stats.is_empty());
    }

    #[test]
    fn skewness_flags_asymmetry() {
        let symmetric: Vec<f64> = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert!(skewness(&symmetric).unwrap().abs() < 1e-9);

        let mut skewed: Vec<f64> = vec![1.0; 50];
        skewed.push(1_000_000.0);
        assert!(skewness(&skewed).unwrap() > 3.0);
    }
}
