//! Hash aggregation
//!
//! Group keys are encoded with Arrow's row format so any combination of key
//! types hashes as plain bytes. Groups are numbered in order of first
//! appearance and each group keeps one [`AggState`] per aggregate.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow::compute::{cast_with_options, CastOptions};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema, SchemaRef};
use arrow::row::{OwnedRow, RowConverter, SortField};

use crate::error::{Error, Result};
use crate::expressions::evaluate_to_array;
use crate::sql::planner::aggregate_output_name;
use crate::sql::types::{AggFunc, AggregateExpr, Expr, Value};
use crate::utils::{is_floating, is_integer, is_numeric, is_string};

/// Aggregation state for a single (aggregate, group) pair
#[derive(Debug, Clone, Default)]
pub struct AggState {
    /// Non-null inputs seen (all rows for COUNT(*))
    pub count: i64,
    pub int_sum: i64,
    pub float_sum: f64,
    pub min: Option<Value>,
    pub max: Option<Value>,
    /// Values already aggregated, for DISTINCT aggregates
    pub distinct: Option<HashSet<OwnedRow>>,
}

impl AggState {
    fn new(distinct: bool) -> Self {
        Self {
            distinct: distinct.then(HashSet::new),
            ..Default::default()
        }
    }

    /// Check if this group has any data
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.float_sum / self.count as f64)
    }

    fn update(&mut self, func: AggFunc, values: &Canonical, i: usize) -> Result<()> {
        self.count += 1;
        match values {
            Canonical::Int(a) => self.update_int(func, a.value(i))?,
            Canonical::Float(a) => self.update_float(func, a.value(i)),
            Canonical::Str(a) => self.update_str(func, a.value(i)),
            Canonical::Bool(a) => self.update_bool(func, a.value(i)),
            Canonical::Other(_) => {}
        }
        Ok(())
    }

    fn update_int(&mut self, func: AggFunc, v: i64) -> Result<()> {
        match func {
            AggFunc::Sum => {
                self.int_sum = self.int_sum.checked_add(v).ok_or_else(|| {
                    Error::Overflow("SUM exceeds the range of a 64-bit integer".into())
                })?;
            }
            AggFunc::Avg => self.float_sum += v as f64,
            AggFunc::Min => {
                if !matches!(self.min, Some(Value::Int(m)) if m <= v) {
                    self.min = Some(Value::Int(v));
                }
            }
            AggFunc::Max => {
                if !matches!(self.max, Some(Value::Int(m)) if m >= v) {
                    self.max = Some(Value::Int(v));
                }
            }
            AggFunc::Count => {}
        }
        Ok(())
    }

    fn update_float(&mut self, func: AggFunc, v: f64) {
        match func {
            AggFunc::Sum | AggFunc::Avg => self.float_sum += v,
            AggFunc::Min => {
                if !matches!(self.min, Some(Value::Float(m)) if m.total_cmp(&v).is_le()) {
                    self.min = Some(Value::Float(v));
                }
            }
            AggFunc::Max => {
                if !matches!(self.max, Some(Value::Float(m)) if m.total_cmp(&v).is_ge()) {
                    self.max = Some(Value::Float(v));
                }
            }
            AggFunc::Count => {}
        }
    }

    fn update_str(&mut self, func: AggFunc, v: &str) {
        match func {
            AggFunc::Min => {
                if !matches!(&self.min, Some(Value::Str(m)) if m.as_str() <= v) {
                    self.min = Some(Value::Str(v.to_string()));
                }
            }
            AggFunc::Max => {
                if !matches!(&self.max, Some(Value::Str(m)) if m.as_str() >= v) {
                    self.max = Some(Value::Str(v.to_string()));
                }
            }
            _ => {}
        }
    }

    fn update_bool(&mut self, func: AggFunc, v: bool) {
        match func {
            AggFunc::Min => {
                if !matches!(self.min, Some(Value::Boolean(m)) if m <= v) {
                    self.min = Some(Value::Boolean(v));
                }
            }
            AggFunc::Max => {
                if !matches!(self.max, Some(Value::Boolean(m)) if m >= v) {
                    self.max = Some(Value::Boolean(v));
                }
            }
            _ => {}
        }
    }
}

/// Aggregate input converted to one of the types the states understand
enum Canonical {
    Int(Int64Array),
    Float(Float64Array),
    Str(StringArray),
    Bool(BooleanArray),
    /// Types only COUNT accepts
    Other(ArrayRef),
}

impl Canonical {
    fn is_valid(&self, i: usize) -> bool {
        match self {
            Canonical::Int(a) => a.is_valid(i),
            Canonical::Float(a) => a.is_valid(i),
            Canonical::Str(a) => a.is_valid(i),
            Canonical::Bool(a) => a.is_valid(i),
            Canonical::Other(a) => a.is_valid(i),
        }
    }
}

/// Type MIN/MAX values are tracked in; temporal values go through their
/// integer representation
fn canonical_type(dt: &DataType) -> Option<DataType> {
    match dt {
        DataType::Null => Some(DataType::Int64),
        DataType::Boolean => Some(DataType::Boolean),
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => Some(DataType::Int64),
        d if is_integer(d) => Some(DataType::Int64),
        d if is_floating(d) => Some(DataType::Float64),
        d if is_string(d) => Some(DataType::Utf8),
        _ => None,
    }
}

fn strict_cast(array: &ArrayRef, to: &DataType) -> Result<ArrayRef> {
    if array.data_type() == to {
        return Ok(array.clone());
    }
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    Ok(cast_with_options(array.as_ref(), to, &options)?)
}

fn canonicalize(values: &ArrayRef) -> Result<Canonical> {
    let canonical = match values.data_type() {
        DataType::Date32 => strict_cast(&strict_cast(values, &DataType::Int32)?, &DataType::Int64)?,
        dt => match canonical_type(dt) {
            Some(t) => strict_cast(values, &t)?,
            None => return Ok(Canonical::Other(values.clone())),
        },
    };
    Ok(match canonical.data_type() {
        DataType::Int64 => Canonical::Int(canonical.as_primitive::<Int64Type>().clone()),
        DataType::Float64 => Canonical::Float(canonical.as_primitive::<Float64Type>().clone()),
        DataType::Utf8 => Canonical::Str(canonical.as_string::<i32>().clone()),
        DataType::Boolean => Canonical::Bool(canonical.as_boolean().clone()),
        _ => Canonical::Other(canonical),
    })
}

/// Output type of an aggregate over input of type `arg`
fn output_type(agg: &AggregateExpr, arg: &DataType) -> Result<DataType> {
    match agg.func {
        AggFunc::Count => Ok(DataType::Int64),
        AggFunc::Sum | AggFunc::Avg if !is_numeric(arg) && arg != &DataType::Null => {
            Err(Error::TypeMismatch(format!(
                "{} requires a numeric argument, got {}",
                agg.func, arg
            )))
        }
        AggFunc::Sum if is_integer(arg) || arg == &DataType::Null => Ok(DataType::Int64),
        AggFunc::Sum | AggFunc::Avg => Ok(DataType::Float64),
        AggFunc::Min | AggFunc::Max => match arg {
            DataType::Null => Ok(DataType::Int64),
            DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => Ok(DataType::Float64),
            other if canonical_type(other).is_some() => Ok(other.clone()),
            other => Err(Error::TypeMismatch(format!(
                "{} is not supported for {}",
                agg.func, other
            ))),
        },
    }
}

/// Hash aggregator over a stream of batches
pub struct Aggregator {
    group_by: Vec<Expr>,
    aggregates: Vec<AggregateExpr>,
    arg_types: Vec<DataType>,
    /// None without GROUP BY: everything lands in group 0
    key_converter: Option<RowConverter>,
    distinct_converters: Vec<Option<RowConverter>>,
    groups: HashMap<OwnedRow, usize>,
    group_rows: Vec<OwnedRow>,
    states: Vec<Vec<AggState>>,
    template: Vec<AggState>,
    schema: SchemaRef,
}

impl Aggregator {
    /// Prepare an aggregation of batches with `input_schema`
    ///
    /// Expression types are resolved against an empty batch, so type errors
    /// surface before any data is read.
    pub fn new(
        group_by: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
        input_schema: &SchemaRef,
    ) -> Result<Self> {
        let empty = RecordBatch::new_empty(input_schema.clone());
        let mut fields = Vec::with_capacity(group_by.len() + aggregates.len());

        let mut key_fields = Vec::with_capacity(group_by.len());
        for expr in &group_by {
            let dt = evaluate_to_array(expr, &empty)?.data_type().clone();
            fields.push(Field::new(aggregate_output_name(fields.len()), dt.clone(), true));
            key_fields.push(SortField::new(dt));
        }
        let key_converter = if group_by.is_empty() {
            None
        } else {
            Some(RowConverter::new(key_fields)?)
        };

        let mut arg_types = Vec::with_capacity(aggregates.len());
        let mut distinct_converters = Vec::with_capacity(aggregates.len());
        for agg in &aggregates {
            let arg_type = match agg.arg.as_ref() {
                Expr::Wildcard => DataType::Null,
                arg => evaluate_to_array(arg, &empty)?.data_type().clone(),
            };
            let name = aggregate_output_name(fields.len());
            fields.push(Field::new(name, output_type(agg, &arg_type)?, true));
            distinct_converters.push(if agg.distinct {
                Some(RowConverter::new(vec![SortField::new(arg_type.clone())])?)
            } else {
                None
            });
            arg_types.push(arg_type);
        }

        let template: Vec<AggState> = aggregates.iter().map(|a| AggState::new(a.distinct)).collect();
        // A global aggregate always produces exactly one row
        let states = if group_by.is_empty() {
            vec![template.clone()]
        } else {
            Vec::new()
        };

        Ok(Self {
            group_by,
            aggregates,
            arg_types,
            key_converter,
            distinct_converters,
            groups: HashMap::new(),
            group_rows: Vec::new(),
            states,
            template,
            schema: Arc::new(Schema::new(fields)),
        })
    }

    /// Output schema: group columns then aggregate columns
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn num_groups(&self) -> usize {
        self.states.len()
    }

    /// Fold one input batch into the group states
    pub fn update_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        let group_ids = self.assign_groups(batch)?;

        for (j, agg) in self.aggregates.iter().enumerate() {
            if matches!(agg.arg.as_ref(), Expr::Wildcard) {
                for &g in &group_ids {
                    self.states[g][j].count += 1;
                }
                continue;
            }

            let values = evaluate_to_array(&agg.arg, batch)?;
            let distinct_rows = match &self.distinct_converters[j] {
                Some(converter) => Some(converter.convert_columns(&[values.clone()])?),
                None => None,
            };
            let canonical = canonicalize(&values)?;

            for (i, &g) in group_ids.iter().enumerate() {
                if !canonical.is_valid(i) {
                    continue;
                }
                let state = &mut self.states[g][j];
                if let (Some(rows), Some(seen)) = (&distinct_rows, state.distinct.as_mut()) {
                    if !seen.insert(rows.row(i).owned()) {
                        continue;
                    }
                }
                state.update(agg.func, &canonical, i)?;
            }
        }
        Ok(())
    }

    /// Map every row of the batch to its group number, creating new groups
    fn assign_groups(&mut self, batch: &RecordBatch) -> Result<Vec<usize>> {
        let Some(converter) = &self.key_converter else {
            return Ok(vec![0; batch.num_rows()]);
        };
        let keys = self
            .group_by
            .iter()
            .map(|e| evaluate_to_array(e, batch))
            .collect::<Result<Vec<_>>>()?;
        let rows = converter.convert_columns(&keys)?;

        let mut ids = Vec::with_capacity(rows.num_rows());
        for row in rows.iter() {
            let id = match self.groups.entry(row.owned()) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(e) => {
                    let id = self.group_rows.len();
                    self.group_rows.push(e.key().clone());
                    self.states.push(self.template.clone());
                    e.insert(id);
                    id
                }
            };
            ids.push(id);
        }
        Ok(ids)
    }

    /// Build the output batch, one row per group in first-appearance order
    pub fn finish(self) -> Result<RecordBatch> {
        let mut columns: Vec<ArrayRef> = match &self.key_converter {
            Some(converter) => converter.convert_rows(self.group_rows.iter().map(|r| r.row()))?,
            None => Vec::new(),
        };
        for (j, agg) in self.aggregates.iter().enumerate() {
            let states: Vec<&AggState> = self.states.iter().map(|g| &g[j]).collect();
            columns.push(build_output(agg, &self.arg_types[j], &states)?);
        }
        Ok(RecordBatch::try_new(self.schema.clone(), columns)?)
    }
}

fn build_output(agg: &AggregateExpr, arg_type: &DataType, states: &[&AggState]) -> Result<ArrayRef> {
    let array: ArrayRef = match agg.func {
        AggFunc::Count => Arc::new(Int64Array::from_iter_values(states.iter().map(|s| s.count))),
        AggFunc::Sum if is_integer(arg_type) || arg_type == &DataType::Null => Arc::new(
            states
                .iter()
                .map(|s| (!s.is_empty()).then_some(s.int_sum))
                .collect::<Int64Array>(),
        ),
        AggFunc::Sum => Arc::new(
            states
                .iter()
                .map(|s| (!s.is_empty()).then_some(s.float_sum))
                .collect::<Float64Array>(),
        ),
        AggFunc::Avg => Arc::new(states.iter().map(|s| s.avg()).collect::<Float64Array>()),
        AggFunc::Min | AggFunc::Max => {
            let values: Vec<Option<&Value>> = states
                .iter()
                .map(|s| {
                    if agg.func == AggFunc::Min {
                        s.min.as_ref()
                    } else {
                        s.max.as_ref()
                    }
                })
                .collect();
            restore_type(extremes_to_array(&values, arg_type)?, arg_type)?
        }
    };
    Ok(array)
}

fn extremes_to_array(values: &[Option<&Value>], arg_type: &DataType) -> Result<ArrayRef> {
    let canonical = canonical_type(arg_type)
        .ok_or_else(|| Error::TypeMismatch(format!("MIN/MAX not supported for {}", arg_type)))?;
    let array: ArrayRef = match canonical {
        DataType::Int64 => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Some(Value::Int(i)) => Some(*i),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        DataType::Float64 => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Some(Value::Float(f)) => Some(*f),
                    _ => None,
                })
                .collect::<Float64Array>(),
        ),
        DataType::Utf8 => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Some(Value::Str(s)) => Some(s.as_str()),
                    _ => None,
                })
                .collect::<StringArray>(),
        ),
        _ => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Some(Value::Boolean(b)) => Some(*b),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        ),
    };
    Ok(array)
}

/// Convert tracked MIN/MAX values back to the input column type
fn restore_type(canonical: ArrayRef, original: &DataType) -> Result<ArrayRef> {
    match original {
        DataType::Null | DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => Ok(canonical),
        DataType::Date32 => strict_cast(&strict_cast(&canonical, &DataType::Int32)?, original),
        other => strict_cast(&canonical, other),
    }
}
