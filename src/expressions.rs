//! Vectorized expression evaluation using Arrow SIMD kernels
//!
//! Every expression evaluates to a [`ColumnarValue`]: either a full column or
//! a single-row scalar that kernels broadcast against columns. Operands of
//! binary operators are coerced to a common type before the kernel runs.

use std::sync::Arc;

use arrow::array::{
    new_null_array, Array, ArrayRef, AsArray, BooleanArray, Datum, Float64Array, Int64Array,
    RecordBatch, Scalar, StringArray, UInt32Array,
};
use arrow::compute::kernels::{cmp, comparison, numeric};
use arrow::compute::{
    and_kleene, cast_with_options, is_not_null, is_null, not, or_kleene, take, CastOptions,
};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::error::ArrowError;

use crate::error::{Error, Result};
use crate::sql::types::{Expr, Operator, Value};
use crate::utils::{is_floating, is_numeric, is_string, is_temporal, resolve_column};

/// Result of evaluating an expression against a batch
#[derive(Debug, Clone)]
pub enum ColumnarValue {
    /// One value per row
    Array(ArrayRef),
    /// A single value (length-1 array) standing for every row
    Scalar(ArrayRef),
}

impl ColumnarValue {
    pub fn data_type(&self) -> &DataType {
        match self {
            ColumnarValue::Array(a) | ColumnarValue::Scalar(a) => a.data_type(),
        }
    }

    /// Materialize as an array of `num_rows` values, repeating a scalar
    pub fn into_array(self, num_rows: usize) -> Result<ArrayRef> {
        match self {
            ColumnarValue::Array(array) => Ok(array),
            ColumnarValue::Scalar(scalar) => {
                let indices = UInt32Array::from(vec![0u32; num_rows]);
                Ok(take(scalar.as_ref(), &indices, None)?)
            }
        }
    }

    /// Apply a unary array function, keeping scalars scalar
    fn map(self, f: impl FnOnce(&ArrayRef) -> Result<ArrayRef>) -> Result<Self> {
        Ok(match self {
            ColumnarValue::Array(a) => ColumnarValue::Array(f(&a)?),
            ColumnarValue::Scalar(a) => ColumnarValue::Scalar(f(&a)?),
        })
    }

    /// Cast to `to`.
    ///
    /// Scalars come from literals, so an unconvertible literal is an error;
    /// unconvertible column values become NULL.
    fn cast_to(self, to: &DataType) -> Result<Self> {
        if self.data_type() == to {
            return Ok(self);
        }
        let strict = matches!(self, ColumnarValue::Scalar(_));
        self.map(|a| cast_array(a, to, strict))
    }
}

fn cast_array(array: &ArrayRef, to: &DataType, strict: bool) -> Result<ArrayRef> {
    let options = CastOptions {
        safe: !strict,
        ..Default::default()
    };
    Ok(cast_with_options(array.as_ref(), to, &options)?)
}

/// Evaluate an expression against a batch
pub fn evaluate(expr: &Expr, batch: &RecordBatch) -> Result<ColumnarValue> {
    let num_rows = batch.num_rows();
    match expr {
        Expr::Column(name) => {
            let idx = resolve_column(batch.schema_ref(), name)?;
            Ok(ColumnarValue::Array(batch.column(idx).clone()))
        }
        Expr::Literal(value) => Ok(ColumnarValue::Scalar(literal_array(value))),
        Expr::Binary { left, op, right } => {
            let l = evaluate(left, batch)?;
            let r = evaluate(right, batch)?;
            binary_op(l, *op, r, num_rows)
        }
        Expr::Not(inner) => {
            let value = evaluate(inner, batch)?;
            let value = as_boolean_value(value, "NOT")?;
            value.map(|a| Ok(Arc::new(not(a.as_boolean())?) as ArrayRef))
        }
        Expr::Negate(inner) => {
            let value = evaluate(inner, batch)?;
            if !is_numeric(value.data_type()) {
                return Err(Error::TypeMismatch(format!(
                    "cannot negate a value of type {}",
                    value.data_type()
                )));
            }
            value.map(|a| Ok(numeric::neg(a.as_ref())?))
        }
        Expr::IsNull { expr, negated } => {
            let negated = *negated;
            evaluate(expr, batch)?.map(|a| {
                let mask = if negated {
                    is_not_null(a.as_ref())?
                } else {
                    is_null(a.as_ref())?
                };
                Ok(Arc::new(mask) as ArrayRef)
            })
        }
        Expr::Like {
            expr,
            pattern,
            negated,
            case_insensitive,
        } => {
            let value = evaluate(expr, batch)?.cast_to(&DataType::Utf8)?;
            let pattern = evaluate(pattern, batch)?.cast_to(&DataType::Utf8)?;
            let kernel = match (*negated, *case_insensitive) {
                (false, false) => comparison::like,
                (false, true) => comparison::ilike,
                (true, false) => comparison::nlike,
                (true, true) => comparison::nilike,
            };
            apply_datum(&value, &pattern, |l, r| Ok(Arc::new(kernel(l, r)?)))
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let value = evaluate(expr, batch)?;
            let mut result: Option<ColumnarValue> = None;
            for item in list {
                let item = evaluate(item, batch)?;
                let eq = binary_op(value.clone(), Operator::Eq, item, num_rows)?;
                result = Some(match result {
                    Some(acc) => binary_op(acc, Operator::Or, eq, num_rows)?,
                    None => eq,
                });
            }
            let result = result.ok_or_else(|| Error::Unsupported("empty IN list".into()))?;
            if *negated {
                result.map(|a| Ok(Arc::new(not(a.as_boolean())?) as ArrayRef))
            } else {
                Ok(result)
            }
        }
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let value = evaluate(expr, batch)?;
            let low = binary_op(value.clone(), Operator::GtEq, evaluate(low, batch)?, num_rows)?;
            let high = binary_op(value, Operator::LtEq, evaluate(high, batch)?, num_rows)?;
            let result = binary_op(low, Operator::And, high, num_rows)?;
            if *negated {
                result.map(|a| Ok(Arc::new(not(a.as_boolean())?) as ArrayRef))
            } else {
                Ok(result)
            }
        }
        Expr::Cast { expr, data_type } => {
            evaluate(expr, batch)?.map(|a| cast_array(a, data_type, true))
        }
        Expr::Aggregate(agg) => Err(Error::Internal(format!(
            "aggregate {} cannot be evaluated row by row",
            agg
        ))),
        Expr::Wildcard => Err(Error::Internal("wildcard cannot be evaluated".into())),
    }
}

/// Evaluate an expression and materialize it as a full column
pub fn evaluate_to_array(expr: &Expr, batch: &RecordBatch) -> Result<ArrayRef> {
    evaluate(expr, batch)?.into_array(batch.num_rows())
}

/// Length-1 array holding a literal
pub fn literal_array(value: &Value) -> ArrayRef {
    match value {
        Value::Null => new_null_array(&DataType::Null, 1),
        Value::Boolean(b) => Arc::new(BooleanArray::from(vec![*b])),
        Value::Int(i) => Arc::new(Int64Array::from(vec![*i])),
        Value::Float(f) => Arc::new(Float64Array::from(vec![*f])),
        Value::Str(s) => Arc::new(StringArray::from(vec![s.as_str()])),
    }
}

/// Common type both operands of `op` are cast to
pub fn coerce_types(lhs: &DataType, rhs: &DataType, op: Operator) -> Result<DataType> {
    if op.is_logical() {
        return match (lhs, rhs) {
            (DataType::Boolean | DataType::Null, DataType::Boolean | DataType::Null) => {
                Ok(DataType::Boolean)
            }
            _ => Err(mismatch(lhs, op, rhs)),
        };
    }

    let common = match (lhs, rhs) {
        (DataType::Null, DataType::Null) if op.is_comparison() => DataType::Boolean,
        (DataType::Null, DataType::Null) => DataType::Int64,
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        (l, r) if l == r => l.clone(),
        (l, r) if is_numeric(l) && is_numeric(r) => {
            if is_floating(l) || is_floating(r) {
                DataType::Float64
            } else {
                DataType::Int64
            }
        }
        (l, r) if is_string(l) && is_string(r) => DataType::Utf8,
        (s, other) | (other, s)
            if is_string(s)
                && (is_numeric(other) || is_temporal(other) || other == &DataType::Boolean) =>
        {
            other.clone()
        }
        (l, r) if is_temporal(l) && is_temporal(r) => {
            DataType::Timestamp(TimeUnit::Microsecond, None)
        }
        _ => return Err(mismatch(lhs, op, rhs)),
    };

    if op.is_arithmetic() && !is_numeric(&common) {
        return Err(mismatch(lhs, op, rhs));
    }
    Ok(common)
}

fn mismatch(lhs: &DataType, op: Operator, rhs: &DataType) -> Error {
    Error::TypeMismatch(format!("cannot apply {} to {} and {}", op, lhs, rhs))
}

/// Apply a binary operator to two evaluated operands
pub fn binary_op(
    lhs: ColumnarValue,
    op: Operator,
    rhs: ColumnarValue,
    num_rows: usize,
) -> Result<ColumnarValue> {
    let common = coerce_types(lhs.data_type(), rhs.data_type(), op)?;

    if op.is_logical() {
        let lhs = lhs.cast_to(&DataType::Boolean)?;
        let rhs = rhs.cast_to(&DataType::Boolean)?;
        return zip_arrays(lhs, rhs, num_rows, |l, r| {
            let (l, r) = (l.as_boolean(), r.as_boolean());
            let result = if op == Operator::And {
                and_kleene(l, r)?
            } else {
                or_kleene(l, r)?
            };
            Ok(Arc::new(result) as ArrayRef)
        });
    }

    // Division is always floating point
    let target = if op == Operator::Divide {
        DataType::Float64
    } else {
        common
    };
    let lhs = lhs.cast_to(&target)?;
    let rhs = rhs.cast_to(&target)?;

    apply_datum(&lhs, &rhs, |l, r| match op {
        Operator::Eq => Ok(Arc::new(cmp::eq(l, r)?)),
        Operator::NotEq => Ok(Arc::new(cmp::neq(l, r)?)),
        Operator::Lt => Ok(Arc::new(cmp::lt(l, r)?)),
        Operator::LtEq => Ok(Arc::new(cmp::lt_eq(l, r)?)),
        Operator::Gt => Ok(Arc::new(cmp::gt(l, r)?)),
        Operator::GtEq => Ok(Arc::new(cmp::gt_eq(l, r)?)),
        Operator::Plus => numeric::add(l, r),
        Operator::Minus => numeric::sub(l, r),
        Operator::Multiply => numeric::mul(l, r),
        Operator::Divide => numeric::div(l, r),
        Operator::Modulo => numeric::rem(l, r),
        Operator::And | Operator::Or => Err(ArrowError::InvalidArgumentError(format!(
            "{} is not a datum operator",
            op
        ))),
    })
}

/// Run a Datum kernel, passing scalars as Arrow scalars so they broadcast
fn apply_datum(
    lhs: &ColumnarValue,
    rhs: &ColumnarValue,
    f: impl Fn(&dyn Datum, &dyn Datum) -> std::result::Result<ArrayRef, ArrowError>,
) -> Result<ColumnarValue> {
    Ok(match (lhs, rhs) {
        (ColumnarValue::Array(l), ColumnarValue::Array(r)) => ColumnarValue::Array(f(l, r)?),
        (ColumnarValue::Array(l), ColumnarValue::Scalar(r)) => {
            ColumnarValue::Array(f(l, &Scalar::new(r.clone()))?)
        }
        (ColumnarValue::Scalar(l), ColumnarValue::Array(r)) => {
            ColumnarValue::Array(f(&Scalar::new(l.clone()), r)?)
        }
        (ColumnarValue::Scalar(l), ColumnarValue::Scalar(r)) => {
            ColumnarValue::Scalar(f(&Scalar::new(l.clone()), &Scalar::new(r.clone()))?)
        }
    })
}

/// Run an array kernel over two operands of equal length
fn zip_arrays(
    lhs: ColumnarValue,
    rhs: ColumnarValue,
    num_rows: usize,
    f: impl Fn(&ArrayRef, &ArrayRef) -> Result<ArrayRef>,
) -> Result<ColumnarValue> {
    match (lhs, rhs) {
        (ColumnarValue::Scalar(l), ColumnarValue::Scalar(r)) => Ok(ColumnarValue::Scalar(f(&l, &r)?)),
        (l, r) => {
            let l = l.into_array(num_rows)?;
            let r = r.into_array(num_rows)?;
            Ok(ColumnarValue::Array(f(&l, &r)?))
        }
    }
}

fn as_boolean_value(value: ColumnarValue, context: &str) -> Result<ColumnarValue> {
    match value.data_type() {
        DataType::Boolean => Ok(value),
        DataType::Null => value.cast_to(&DataType::Boolean),
        other => Err(Error::TypeMismatch(format!(
            "{} expects a boolean operand, got {}",
            context, other
        ))),
    }
}
