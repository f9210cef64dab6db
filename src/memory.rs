//! In-memory columnar table
//!
//! A loaded file lives in memory as a list of Arrow record batches sharing one
//! schema. Batches are reference counted, so slicing, re-chunking and handing
//! a table to a query worker never copies column data.

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use arrow_select::concat::concat_batches;

use crate::error::{Error, Result};

/// Immutable in-memory table
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    num_rows: usize,
}

impl Table {
    /// Create a table from batches that all share `schema`
    pub fn new(name: impl Into<String>, schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        for batch in &batches {
            if batch.schema().fields() != schema.fields() {
                return Err(Error::Internal(format!(
                    "batch schema {:?} does not match table schema {:?}",
                    batch.schema(),
                    schema
                )));
            }
        }
        // Empty batches carry no rows and only slow down scans
        let batches: Vec<RecordBatch> = batches.into_iter().filter(|b| b.num_rows() > 0).collect();
        let num_rows = batches.iter().map(|b| b.num_rows()).sum();
        Ok(Self {
            name: name.into(),
            schema,
            batches,
            num_rows,
        })
    }

    /// Create a table taking the schema from the first batch
    pub fn from_batches(name: impl Into<String>, batches: Vec<RecordBatch>) -> Result<Self> {
        let schema = batches
            .first()
            .map(|b| b.schema())
            .ok_or_else(|| Error::Internal("cannot build a table from zero batches".into()))?;
        Self::new(name, schema, batches)
    }

    /// Create a table with no rows
    pub fn empty(name: impl Into<String>, schema: SchemaRef) -> Self {
        Self {
            name: name.into(),
            schema,
            batches: Vec::new(),
            num_rows: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.fields().iter().map(|f| f.name().clone()).collect()
    }

    /// Same data under a different name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Re-slice the rows into batches of exactly `size` rows (the last may be shorter)
    pub fn rechunk(&self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Internal("chunk size must be greater than zero".into()));
        }
        let mut batches = Vec::with_capacity(self.num_rows.div_ceil(size));
        let mut offset = 0;
        while offset < self.num_rows {
            let len = size.min(self.num_rows - offset);
            batches.push(self.slice(offset, len)?);
            offset += len;
        }
        Self::new(self.name.clone(), self.schema.clone(), batches)
    }

    /// Rows `[offset, offset + len)` as one batch
    ///
    /// Rows past the end of the table are ignored, so a range that starts
    /// beyond the last row yields an empty batch with the table schema.
    pub fn slice(&self, offset: usize, len: usize) -> Result<RecordBatch> {
        let end = offset.saturating_add(len).min(self.num_rows);
        if offset >= end {
            return Ok(RecordBatch::new_empty(self.schema.clone()));
        }

        let mut parts = Vec::new();
        let mut batch_start = 0;
        for batch in &self.batches {
            let batch_end = batch_start + batch.num_rows();
            if batch_end > offset && batch_start < end {
                let from = offset.max(batch_start) - batch_start;
                let to = end.min(batch_end) - batch_start;
                parts.push(batch.slice(from, to - from));
            }
            if batch_end >= end {
                break;
            }
            batch_start = batch_end;
        }

        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }
        Ok(concat_batches(&self.schema, &parts)?)
    }

    /// All rows as a single batch
    pub fn to_batch(&self) -> Result<RecordBatch> {
        self.slice(0, self.num_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{AsArray, Int64Array};
    use arrow::datatypes::{DataType, Field, Int64Type, Schema};

    fn int_batch(schema: &SchemaRef, values: Vec<i64>) -> RecordBatch {
        RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(values))]).unwrap()
    }

    fn sample_table() -> Table {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let batches = vec![
            int_batch(&schema, vec![1, 2, 3]),
            int_batch(&schema, vec![]),
            int_batch(&schema, vec![4, 5]),
            int_batch(&schema, vec![6, 7, 8, 9]),
        ];
        Table::new("t", schema, batches).unwrap()
    }

    fn ids(batch: &RecordBatch) -> Vec<i64> {
        batch.column(0).as_primitive::<Int64Type>().values().to_vec()
    }

    #[test]
    fn test_table_creation() {
        let table = sample_table();
        assert_eq!(table.num_rows(), 9);
        assert_eq!(table.batches().len(), 3);
        assert_eq!(table.column_names(), vec!["id".to_string()]);
    }

    #[test]
    fn test_schema_mismatch_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let other = Arc::new(Schema::new(vec![Field::new("other", DataType::Int64, false)]));
        let result = Table::new("t", schema, vec![int_batch(&other, vec![1])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_slice_across_batches() {
        let table = sample_table();
        assert_eq!(ids(&table.slice(2, 4).unwrap()), vec![3, 4, 5, 6]);
        assert_eq!(ids(&table.slice(0, 3).unwrap()), vec![1, 2, 3]);
        assert_eq!(ids(&table.slice(7, 10).unwrap()), vec![8, 9]);
    }

    #[test]
    fn test_slice_past_end_is_empty() {
        let table = sample_table();
        let batch = table.slice(100, 5).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema(), *table.schema());
    }

    #[test]
    fn test_rechunk() {
        let table = sample_table().rechunk(4).unwrap();
        let sizes: Vec<usize> = table.batches().iter().map(|b| b.num_rows()).collect();
        assert_eq!(sizes, vec![4, 4, 1]);
        assert_eq!(ids(&table.to_batch().unwrap()), (1..=9).collect::<Vec<_>>());
    }
}
