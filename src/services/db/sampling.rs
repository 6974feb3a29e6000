// Shared sampling strategies: full scan, stratified, random-offset.
// Partition-aware sampling lives in the BigQuery handler.

use rand::seq::index::sample as sample_indices;
use serde_json::Value;

use crate::models::metadata::{SampleRow, SamplingMethod, TableSample, TableSchema};
use crate::utils::ApiResult;

use super::{DatabaseHandler, SampleSpec, SqlValue, check_identifiers};

/// Distinct-value ceiling for a column to qualify as a stratification key
const MAX_STRATA: usize = 10;
/// Probe limit when counting distinct values of a candidate column
const STRATA_PROBE_LIMIT: usize = 20;

/// Default sampling for engines without native partitioning.
///
/// Strategy ladder:
/// - `full` when the table fits in `size * count` rows;
/// - `stratified` over a low-cardinality column when one exists;
/// - `random-offset` otherwise. Stratification failures fall back.
pub async fn standard_sample<H>(
    handler: &H,
    schema: &str,
    table: &str,
    spec: &SampleSpec,
) -> ApiResult<TableSample>
where
    H: DatabaseHandler + ?Sized,
{
    check_identifiers([schema, table])?;

    let table_schema = handler.table_schema(schema, table).await?;
    let columns = table_schema.column_names();
    let target = spec.sample_size.saturating_mul(spec.num_samples).max(1);

    let row_count = handler.row_count(schema, table, true).await?;
    let row_count = match row_count {
        Some(n) if n > 0 => n,
        _ => {
            tracing::warn!("Table {}.{} appears to be empty", schema, table);
            return Ok(TableSample::empty(columns, SamplingMethod::Full));
        }
    };

    let table_ref = handler.table_ref(schema, table);

    if row_count as usize <= target {
        // Small table - take everything
        let sql = format!("SELECT * FROM {} {}", table_ref, handler.limit_clause(target, 0));
        let rows = handler.fetch_all(&sql, &[]).await?;
        return Ok(assemble(columns, rows, SamplingMethod::Full));
    }

    match stratified_sample(handler, schema, table, &table_schema, spec).await {
        Ok(Some(rows)) if !rows.is_empty() => {
            tracing::debug!("Stratified sampling used for {}.{}", schema, table);
            return Ok(assemble(columns, rows, SamplingMethod::Stratified));
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(
                "Stratified sampling failed for {}.{}: {}, falling back to random offsets",
                schema,
                table,
                e
            );
        }
    }

    let rows = random_offset_sample(handler, &table_ref, spec, row_count).await?;
    Ok(assemble(columns, rows, SamplingMethod::RandomOffset))
}

/// Stratified sampling over the first low-cardinality text-like column.
/// Returns Ok(None) when no suitable stratification column exists.
async fn stratified_sample<H>(
    handler: &H,
    schema: &str,
    table: &str,
    table_schema: &TableSchema,
    spec: &SampleSpec,
) -> ApiResult<Option<Vec<SampleRow>>>
where
    H: DatabaseHandler + ?Sized,
{
    let candidate = table_schema.columns.iter().find(|c| {
        let ty = c.data_type.to_lowercase();
        ["varchar", "char", "text", "enum", "bool", "string"]
            .iter()
            .any(|t| ty.contains(t))
    });

    let Some(candidate) = candidate else {
        return Ok(None);
    };
    check_identifiers([candidate.name.as_str()])?;

    let table_ref = handler.table_ref(schema, table);
    let column = handler.quote_ident(&candidate.name);

    let probe_sql = format!(
        "SELECT DISTINCT {} AS stratum FROM {} WHERE {} IS NOT NULL {}",
        column,
        table_ref,
        column,
        handler.limit_clause(STRATA_PROBE_LIMIT, 0)
    );
    let strata_rows = handler.fetch_all(&probe_sql, &[]).await?;

    let strata: Vec<Value> = strata_rows
        .iter()
        .filter_map(|row| row.values().next().cloned())
        .collect();

    if strata.is_empty() || strata.len() > MAX_STRATA {
        return Ok(None);
    }

    let per_stratum = (spec.sample_size + strata.len() - 1) / strata.len().max(1);
    let per_stratum = per_stratum.max(1);

    let mut rows = Vec::new();
    for stratum in &strata {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = :stratum {}",
            table_ref,
            column,
            handler.limit_clause(per_stratum, 0)
        );
        let params = [("stratum", SqlValue::from_json(stratum))];
        let stratum_rows = handler.fetch_all(&sql, &params).await?;
        rows.extend(stratum_rows);
    }

    Ok(Some(rows))
}

/// Up to `num_samples` windows of `sample_size` rows at distinct offsets
async fn random_offset_sample<H>(
    handler: &H,
    table_ref: &str,
    spec: &SampleSpec,
    row_count: i64,
) -> ApiResult<Vec<SampleRow>>
where
    H: DatabaseHandler + ?Sized,
{
    let max_offset = (row_count as usize).saturating_sub(spec.sample_size);
    let offsets: Vec<usize> = if max_offset == 0 {
        vec![0]
    } else {
        let take = spec.num_samples.min(max_offset);
        let mut rng = rand::thread_rng();
        sample_indices(&mut rng, max_offset, take).into_iter().collect()
    };

    let mut rows = Vec::new();
    for offset in offsets {
        let sql = format!(
            "SELECT * FROM {} {}",
            table_ref,
            handler.limit_clause(spec.sample_size, offset)
        );
        let chunk = handler.fetch_all(&sql, &[]).await?;
        rows.extend(chunk);
    }
    Ok(rows)
}

/// Normalize fetched rows so the sample's column set equals the introspected
/// schema keys; missing columns surface as explicit nulls.
pub fn assemble(columns: Vec<String>, rows: Vec<SampleRow>, method: SamplingMethod) -> TableSample {
    let rows = rows
        .into_iter()
        .map(|mut raw| {
            let mut row = SampleRow::new();
            for column in &columns {
                let value = raw.remove(column).unwrap_or(Value::Null);
                row.insert(column.clone(), value);
            }
            row
        })
        .collect();
    TableSample { columns, rows, method }
}
