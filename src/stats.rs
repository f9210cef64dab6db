//! Column statistics over a table
//!
//! Statistics are computed by running small aggregate plans through the
//! regular executor, so they share the engine's type rules and null handling.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, Float64Array, RecordBatch, StringArray, UInt64Array,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use arrow_select::concat::{concat, concat_batches};
use tracing::debug;

use crate::error::{Error, Result};
use crate::memory::Table;
use crate::query::{CancelToken, QueryExecutor};
use crate::sql::planner::LogicalPlan;
use crate::sql::types::{AggFunc, AggregateExpr, Expr};
use crate::utils::{is_numeric, is_string, is_temporal, resolve_column};

/// Default number of entries reported by [`value_counts`]
pub const DEFAULT_VALUE_COUNTS_LIMIT: usize = 50;

/// Summary statistics for one column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub name: String,
    pub data_type: DataType,
    /// Non-null values
    pub count: usize,
    pub null_count: usize,
    pub distinct_count: usize,
    pub min: Option<String>,
    pub max: Option<String>,
    /// Only for numeric columns
    pub mean: Option<f64>,
    /// Sample standard deviation; needs two non-null numeric values
    pub std: Option<f64>,
}

impl ColumnStats {
    /// Render a list of column statistics as a table, one row per column
    pub fn to_batch(stats: &[ColumnStats]) -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("column", DataType::Utf8, false),
            Field::new("type", DataType::Utf8, false),
            Field::new("count", DataType::UInt64, false),
            Field::new("null_count", DataType::UInt64, false),
            Field::new("distinct", DataType::UInt64, false),
            Field::new("min", DataType::Utf8, true),
            Field::new("max", DataType::Utf8, true),
            Field::new("mean", DataType::Float64, true),
            Field::new("std", DataType::Float64, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(stats.iter().map(|s| s.name.as_str()))),
            Arc::new(StringArray::from_iter_values(
                stats.iter().map(|s| s.data_type.to_string()),
            )),
            Arc::new(UInt64Array::from_iter_values(stats.iter().map(|s| s.count as u64))),
            Arc::new(UInt64Array::from_iter_values(
                stats.iter().map(|s| s.null_count as u64),
            )),
            Arc::new(UInt64Array::from_iter_values(
                stats.iter().map(|s| s.distinct_count as u64),
            )),
            Arc::new(stats.iter().map(|s| s.min.as_deref()).collect::<StringArray>()),
            Arc::new(stats.iter().map(|s| s.max.as_deref()).collect::<StringArray>()),
            Arc::new(stats.iter().map(|s| s.mean).collect::<Float64Array>()),
            Arc::new(stats.iter().map(|s| s.std).collect::<Float64Array>()),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

fn aggregate(func: AggFunc, arg: Expr, distinct: bool) -> AggregateExpr {
    AggregateExpr {
        func,
        arg: Box::new(arg),
        distinct,
    }
}

fn scan(table: &Table) -> LogicalPlan {
    LogicalPlan::Scan {
        table: table.name().to_string(),
        schema: table.schema().clone(),
    }
}

fn run(table: &Table, plan: &LogicalPlan) -> Result<RecordBatch> {
    let batches = QueryExecutor::new(table, CancelToken::new()).execute(plan)?;
    let schema = batches
        .first()
        .map(|b| b.schema())
        .ok_or_else(|| Error::Internal("statistics plan produced no batch".into()))?;
    Ok(concat_batches(&schema, &batches)?)
}

fn format_value(array: &dyn Array, idx: usize) -> Result<Option<String>> {
    if array.is_null(idx) {
        return Ok(None);
    }
    let options = FormatOptions::default();
    let formatter = ArrayFormatter::try_new(array, &options)?;
    Ok(Some(formatter.value(idx).to_string()))
}

/// Sample standard deviation of column `idx` around `mean`
fn sample_std(table: &Table, idx: usize, mean: f64, count: usize) -> Result<Option<f64>> {
    if count < 2 {
        return Ok(None);
    }
    let mut squares = 0.0;
    for batch in table.batches() {
        let values = cast(batch.column(idx), &DataType::Float64)?;
        squares += values
            .as_primitive::<Float64Type>()
            .iter()
            .flatten()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>();
    }
    Ok(Some((squares / (count - 1) as f64).sqrt()))
}

/// Compute statistics for one column
pub fn describe(table: &Table, column: &str) -> Result<ColumnStats> {
    let idx = resolve_column(table.schema(), column)?;
    let field = table.schema().field(idx).clone();
    let col = Expr::column(field.name().clone());
    let data_type = field.data_type().clone();

    let with_min_max =
        is_numeric(&data_type) || is_string(&data_type) || is_temporal(&data_type)
            || data_type == DataType::Boolean;
    let with_mean = is_numeric(&data_type);

    let mut aggregates = vec![
        aggregate(AggFunc::Count, Expr::Wildcard, false),
        aggregate(AggFunc::Count, col.clone(), false),
        aggregate(AggFunc::Count, col.clone(), true),
    ];
    if with_min_max {
        aggregates.push(aggregate(AggFunc::Min, col.clone(), false));
        aggregates.push(aggregate(AggFunc::Max, col.clone(), false));
    }
    if with_mean {
        aggregates.push(aggregate(AggFunc::Avg, col, false));
    }

    let plan = LogicalPlan::Aggregate {
        group_by: Vec::new(),
        aggregates,
        input: Box::new(scan(table)),
    };
    let batch = run(table, &plan)?;
    debug!(column = %field.name(), "Described column");

    let int_at = |idx: usize| batch.column(idx).as_primitive::<Int64Type>().value(0) as usize;
    let total = int_at(0);
    let count = int_at(1);
    let distinct_count = int_at(2);
    let (min, max) = if with_min_max {
        (
            format_value(batch.column(3).as_ref(), 0)?,
            format_value(batch.column(4).as_ref(), 0)?,
        )
    } else {
        (None, None)
    };
    let mean = if with_mean {
        let avg = batch.column(batch.num_columns() - 1).as_primitive::<Float64Type>();
        (!avg.is_null(0)).then(|| avg.value(0))
    } else {
        None
    };
    let std = match mean {
        Some(mean) => sample_std(table, idx, mean, count)?,
        None => None,
    };

    Ok(ColumnStats {
        name: field.name().clone(),
        data_type,
        count,
        null_count: total - count,
        distinct_count,
        min,
        max,
        mean,
        std,
    })
}

/// Compute statistics for every column
pub fn describe_all(table: &Table) -> Result<Vec<ColumnStats>> {
    table
        .column_names()
        .iter()
        .map(|name| describe(table, name))
        .collect()
}

/// Occurrences of one value in the view and in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueCount {
    /// Display text of the value, `None` for NULL
    pub value: Option<String>,
    /// `None` when the value does not occur in the view
    pub view_count: Option<usize>,
    /// `None` when the value does not occur in the source (or the source
    /// has no such column)
    pub source_count: Option<usize>,
}

/// Value frequencies of a column, comparing the current view to its source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueCounts {
    pub column: String,
    pub view_total: usize,
    /// `None` when the column does not exist in the source
    pub source_total: Option<usize>,
    pub entries: Vec<ValueCount>,
    /// Distinct values left out of `entries`
    pub truncated: usize,
}

impl ValueCounts {
    /// Render as a table with counts and percentages of the totals
    pub fn to_batch(&self) -> Result<RecordBatch> {
        let percent = |count: Option<usize>, total: Option<usize>| match (count, total) {
            (Some(c), Some(t)) if t > 0 => Some(c as f64 * 100.0 / t as f64),
            _ => None,
        };
        let schema = Arc::new(Schema::new(vec![
            Field::new("value", DataType::Utf8, true),
            Field::new("view_count", DataType::UInt64, true),
            Field::new("view_pct", DataType::Float64, true),
            Field::new("source_count", DataType::UInt64, true),
            Field::new("source_pct", DataType::Float64, true),
        ]));
        let entries = &self.entries;
        let columns: Vec<ArrayRef> = vec![
            Arc::new(entries.iter().map(|e| e.value.as_deref()).collect::<StringArray>()),
            Arc::new(
                entries
                    .iter()
                    .map(|e| e.view_count.map(|c| c as u64))
                    .collect::<UInt64Array>(),
            ),
            Arc::new(
                entries
                    .iter()
                    .map(|e| percent(e.view_count, Some(self.view_total)))
                    .collect::<Float64Array>(),
            ),
            Arc::new(
                entries
                    .iter()
                    .map(|e| e.source_count.map(|c| c as u64))
                    .collect::<UInt64Array>(),
            ),
            Arc::new(
                entries
                    .iter()
                    .map(|e| percent(e.source_count, self.source_total))
                    .collect::<Float64Array>(),
            ),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

/// Count rows per distinct value of `column`
fn count_values(table: &Table, column: &str) -> Result<(HashMap<Option<String>, usize>, usize)> {
    let name = table.schema().field(resolve_column(table.schema(), column)?).name().clone();
    let plan = LogicalPlan::Aggregate {
        group_by: vec![Expr::column(name)],
        aggregates: vec![aggregate(AggFunc::Count, Expr::Wildcard, false)],
        input: Box::new(scan(table)),
    };
    let batch = run(table, &plan)?;

    let values = batch.column(0);
    let counts = batch.column(1).as_primitive::<Int64Type>();
    let options = FormatOptions::default();
    let formatter = ArrayFormatter::try_new(values.as_ref(), &options)?;

    let mut map = HashMap::with_capacity(batch.num_rows());
    let mut total = 0;
    for i in 0..batch.num_rows() {
        let key = if values.is_null(i) {
            None
        } else {
            Some(formatter.value(i).to_string())
        };
        let count = counts.value(i) as usize;
        *map.entry(key).or_insert(0) += count;
        total += count;
    }
    Ok((map, total))
}

/// Value counts of `column` in `view`, compared against `source`
///
/// Entries are ordered by view count, then source count, then value, all
/// descending; values missing from a side sort after every present one.
pub fn value_counts(view: &Table, column: &str, source: &Table, limit: usize) -> Result<ValueCounts> {
    let (view_counts, view_total) = count_values(view, column)?;
    let (source_counts, source_total) = match count_values(source, column) {
        Ok((counts, total)) => (counts, Some(total)),
        Err(Error::ColumnNotFound(_)) => (HashMap::new(), None),
        Err(e) => return Err(e),
    };

    let mut entries: Vec<ValueCount> = view_counts
        .keys()
        .chain(source_counts.keys().filter(|k| !view_counts.contains_key(*k)))
        .map(|value| ValueCount {
            value: value.clone(),
            view_count: view_counts.get(value).copied(),
            source_count: source_counts.get(value).copied(),
        })
        .collect();

    entries.sort_by_key(|e| {
        Reverse((
            e.view_count.map_or(-1, |c| c as i64),
            e.source_count.map_or(-1, |c| c as i64),
            e.value.clone().unwrap_or_else(|| "NULL".to_string()),
        ))
    });

    let truncated = entries.len().saturating_sub(limit);
    entries.truncate(limit);

    Ok(ValueCounts {
        column: column.to_string(),
        view_total,
        source_total,
        entries,
        truncated,
    })
}

/// Distinct values of a column in first-appearance order
pub fn unique_values(table: &Table, column: &str) -> Result<ArrayRef> {
    let name = table.schema().field(resolve_column(table.schema(), column)?).name().clone();
    let plan = LogicalPlan::Distinct {
        input: Box::new(LogicalPlan::Projection {
            exprs: vec![(Expr::column(name.clone()), name)],
            input: Box::new(scan(table)),
        }),
    };
    let batches = QueryExecutor::new(table, CancelToken::new()).execute(&plan)?;
    let arrays: Vec<&dyn Array> = batches.iter().map(|b| b.column(0).as_ref()).collect();
    Ok(concat(&arrays)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;

    fn table(name: &str, cities: Vec<Option<&str>>) -> Table {
        let n = cities.len() as i64;
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("city", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from((1..=n).collect::<Vec<_>>())),
                Arc::new(StringArray::from(cities)),
            ],
        )
        .unwrap();
        Table::new(name, schema, vec![batch]).unwrap()
    }

    fn source() -> Table {
        table(
            "data",
            vec![Some("Oslo"), Some("Lima"), Some("Oslo"), None, Some("Pune"), Some("Oslo")],
        )
    }

    #[test]
    fn test_describe_numeric() {
        let stats = describe(&source(), "ID").unwrap();
        assert_eq!(stats.name, "id");
        assert_eq!(stats.count, 6);
        assert_eq!(stats.null_count, 0);
        assert_eq!(stats.distinct_count, 6);
        assert_eq!(stats.min.as_deref(), Some("1"));
        assert_eq!(stats.max.as_deref(), Some("6"));
        assert_eq!(stats.mean, Some(3.5));
        // 1..=6 has sample variance 3.5
        assert!((stats.std.unwrap() - 3.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_describe_std_skips_nulls() {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Float64, true)]));
        let values = vec![
            Some(2.0),
            Some(4.0),
            None,
            Some(4.0),
            Some(4.0),
            Some(5.0),
            Some(5.0),
            Some(7.0),
            Some(9.0),
        ];
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Float64Array::from(values))])
                .unwrap();
        let table = Table::new("data", schema.clone(), vec![batch.slice(0, 4), batch.slice(4, 5)])
            .unwrap();
        let stats = describe(&table, "x").unwrap();
        assert_eq!(stats.count, 8);
        assert_eq!(stats.mean, Some(5.0));
        assert!((stats.std.unwrap() - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);

        let one = Table::new("data", schema, vec![batch.slice(0, 1)]).unwrap();
        assert_eq!(describe(&one, "x").unwrap().std, None);
    }

    #[test]
    fn test_describe_text_with_nulls() {
        let stats = describe(&source(), "city").unwrap();
        assert_eq!(stats.count, 5);
        assert_eq!(stats.null_count, 1);
        assert_eq!(stats.distinct_count, 3);
        assert_eq!(stats.min.as_deref(), Some("Lima"));
        assert_eq!(stats.max.as_deref(), Some("Pune"));
        assert_eq!(stats.mean, None);
        assert_eq!(stats.std, None);
    }

    #[test]
    fn test_describe_all_to_batch() {
        let stats = describe_all(&source()).unwrap();
        assert_eq!(stats.len(), 2);
        let batch = ColumnStats::to_batch(&stats).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().field(8).name(), "std");
    }

    #[test]
    fn test_value_counts_against_source() {
        let view = table("data", vec![Some("Lima"), Some("Pune"), Some("Pune")]);
        let counts = value_counts(&view, "city", &source(), 50).unwrap();
        assert_eq!(counts.view_total, 3);
        assert_eq!(counts.source_total, Some(6));
        assert_eq!(counts.truncated, 0);

        let values: Vec<Option<&str>> = counts.entries.iter().map(|e| e.value.as_deref()).collect();
        assert_eq!(values, vec![Some("Pune"), Some("Lima"), Some("Oslo"), None]);
        assert_eq!(counts.entries[0].view_count, Some(2));
        assert_eq!(counts.entries[0].source_count, Some(1));
        assert_eq!(counts.entries[2].view_count, None);
        assert_eq!(counts.entries[2].source_count, Some(3));
    }

    #[test]
    fn test_value_counts_truncates() {
        let counts = value_counts(&source(), "city", &source(), 2).unwrap();
        assert_eq!(counts.entries.len(), 2);
        assert_eq!(counts.truncated, 2);
        assert_eq!(counts.entries[0].value.as_deref(), Some("Oslo"));
        assert_eq!(counts.to_batch().unwrap().num_rows(), 2);
    }

    #[test]
    fn test_value_counts_column_missing_in_source() {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(vec![1, 1]))])
                .unwrap();
        let view = Table::new("data", schema, vec![batch]).unwrap();
        let counts = value_counts(&view, "n", &source(), 50).unwrap();
        assert_eq!(counts.source_total, None);
        assert_eq!(counts.entries[0].view_count, Some(2));
        assert_eq!(counts.entries[0].source_count, None);
    }

    #[test]
    fn test_unique_values() {
        let values = unique_values(&source(), "city").unwrap();
        assert_eq!(values.len(), 4);
        assert_eq!(values.as_string::<i32>().value(0), "Oslo");
        assert!(values.is_null(2));
    }
}
