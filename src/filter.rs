//! Vectorized predicate filtering using Arrow compute kernels

use arrow::array::{Array, AsArray, BooleanArray, RecordBatch};
use arrow::compute;
use arrow::datatypes::DataType;

use crate::error::{Error, Result};
use crate::expressions::evaluate_to_array;
use crate::sql::types::Expr;

/// Evaluate a predicate into a boolean mask, one entry per row
pub fn evaluate_predicate(predicate: &Expr, batch: &RecordBatch) -> Result<BooleanArray> {
    let array = evaluate_to_array(predicate, batch)?;
    match array.data_type() {
        DataType::Boolean => Ok(array.as_boolean().clone()),
        // A bare NULL predicate keeps nothing
        DataType::Null => Ok(BooleanArray::new_null(array.len())),
        other => Err(Error::TypeMismatch(format!(
            "predicate {} must be boolean, got {}",
            predicate, other
        ))),
    }
}

/// Apply a predicate, returning only the rows where it is true
///
/// Rows where the predicate is NULL are dropped.
pub fn apply_filter(batch: &RecordBatch, predicate: &Expr) -> Result<RecordBatch> {
    let mask = evaluate_predicate(predicate, batch)?;
    filter_with_mask(batch, &mask)
}

/// Filter a batch with an already computed mask
pub fn filter_with_mask(batch: &RecordBatch, mask: &BooleanArray) -> Result<RecordBatch> {
    // Skip the copy when everything passes
    if mask.true_count() == batch.num_rows() {
        return Ok(batch.clone());
    }
    Ok(compute::filter_record_batch(batch, mask)?)
}

/// Get the number of rows that pass the predicate
pub fn count_matching_rows(batch: &RecordBatch, predicate: &Expr) -> Result<usize> {
    let mask = evaluate_predicate(predicate, batch)?;
    // true_count ignores NULL slots
    Ok(mask.true_count())
}
