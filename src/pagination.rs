//! Paged access to query results
//!
//! Pages are numbered from 1. A result with no rows has zero pages, and
//! asking for a page past the end yields an empty batch rather than an error
//! so a viewer can always render the header.

use std::sync::Arc;
use std::time::Duration;

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use tracing::debug;

use crate::error::{Error, Result};
use crate::memory::Table;

/// Materialized query result with a page size
#[derive(Debug, Clone)]
pub struct ResultSet {
    table: Arc<Table>,
    page_size: usize,
    elapsed: Duration,
}

impl ResultSet {
    pub fn new(table: Arc<Table>, page_size: usize, elapsed: Duration) -> Self {
        Self {
            table,
            page_size: page_size.max(1),
            elapsed,
        }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn schema(&self) -> &SchemaRef {
        self.table.schema()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.table.column_names()
    }

    pub fn total_rows(&self) -> usize {
        self.table.num_rows()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Time spent planning and executing the query
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn total_pages(&self) -> usize {
        self.total_rows().div_ceil(self.page_size)
    }

    /// Same rows with a different page size
    pub fn with_page_size(self, page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            ..self
        }
    }

    /// Index of the first row of `page`
    pub fn page_row_offset(&self, page: usize) -> Result<usize> {
        if page == 0 {
            return Err(Error::InvalidPage(page));
        }
        Ok((page - 1).saturating_mul(self.page_size))
    }

    /// 1-based inclusive row range shown on `page`, `None` when the page is empty
    pub fn page_range(&self, page: usize) -> Result<Option<(usize, usize)>> {
        let offset = self.page_row_offset(page)?;
        if offset >= self.total_rows() {
            return Ok(None);
        }
        let end = (offset + self.page_size).min(self.total_rows());
        Ok(Some((offset + 1, end)))
    }

    /// Rows of one page
    pub fn page(&self, page: usize) -> Result<RecordBatch> {
        let offset = self.page_row_offset(page)?;
        debug!(page, offset, page_size = self.page_size, "Fetching page");
        self.table.slice(offset, self.page_size)
    }

    /// Every row as a single batch
    pub fn to_batch(&self) -> Result<RecordBatch> {
        self.table.to_batch()
    }
}

/// Page cursor for a result with `total_pages` pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    page: usize,
    total_pages: usize,
}

impl Pager {
    pub fn new(total_pages: usize) -> Self {
        Self {
            page: 1,
            total_pages,
        }
    }

    pub fn for_result(result: &ResultSet) -> Self {
        Self::new(result.total_pages())
    }

    pub fn current(&self) -> usize {
        self.page
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    fn last_page(&self) -> usize {
        self.total_pages.max(1)
    }

    pub fn can_prev(&self) -> bool {
        self.page > 1
    }

    pub fn can_next(&self) -> bool {
        self.page < self.last_page()
    }

    pub fn first(&mut self) -> usize {
        self.page = 1;
        self.page
    }

    pub fn prev(&mut self) -> usize {
        if self.can_prev() {
            self.page -= 1;
        }
        self.page
    }

    pub fn next(&mut self) -> usize {
        if self.can_next() {
            self.page += 1;
        }
        self.page
    }

    pub fn last(&mut self) -> usize {
        self.page = self.last_page();
        self.page
    }

    /// Jump to `page`, clamped to the valid range
    pub fn go_to(&mut self, page: usize) -> usize {
        self.page = page.clamp(1, self.last_page());
        self.page
    }

    /// Follow a new result, keeping the current page when it still exists
    pub fn set_total_pages(&mut self, total_pages: usize) {
        self.total_pages = total_pages;
        self.page = self.page.clamp(1, self.last_page());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{AsArray, Int64Array};
    use arrow::datatypes::{DataType, Field, Int64Type, Schema};

    fn result(rows: i64, page_size: usize) -> ResultSet {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from((1..=rows).collect::<Vec<_>>()))],
        )
        .unwrap();
        let table = Table::new("data", schema, vec![batch]).unwrap();
        ResultSet::new(Arc::new(table), page_size, Duration::ZERO)
    }

    #[test]
    fn test_page_counts() {
        assert_eq!(result(10, 4).total_pages(), 3);
        assert_eq!(result(8, 4).total_pages(), 2);
        assert_eq!(result(0, 4).total_pages(), 0);
    }

    #[test]
    fn test_last_partial_page() {
        let rs = result(10, 4);
        let page = rs.page(3).unwrap();
        let values = page.column(0).as_primitive::<Int64Type>().values().to_vec();
        assert_eq!(values, vec![9, 10]);
        assert_eq!(rs.page_range(3).unwrap(), Some((9, 10)));
    }

    #[test]
    fn test_page_zero_and_past_end() {
        let rs = result(10, 4);
        assert!(matches!(rs.page(0), Err(Error::InvalidPage(0))));
        let past = rs.page(9).unwrap();
        assert_eq!(past.num_rows(), 0);
        assert_eq!(past.num_columns(), 1);
        assert_eq!(rs.page_range(9).unwrap(), None);
    }

    #[test]
    fn test_with_page_size() {
        let rs = result(10, 4).with_page_size(5);
        assert_eq!(rs.total_pages(), 2);
        assert_eq!(rs.page_row_offset(2).unwrap(), 5);
    }

    #[test]
    fn test_pager_stays_in_range() {
        let mut pager = Pager::new(3);
        assert!(!pager.can_prev());
        assert_eq!(pager.prev(), 1);
        assert_eq!(pager.next(), 2);
        assert_eq!(pager.last(), 3);
        assert_eq!(pager.next(), 3);
        assert_eq!(pager.go_to(42), 3);
        pager.set_total_pages(2);
        assert_eq!(pager.current(), 2);
    }

    #[test]
    fn test_pager_on_empty_result() {
        let mut pager = Pager::for_result(&result(0, 4));
        assert_eq!(pager.last(), 1);
        assert!(!pager.can_next());
        assert!(!pager.can_prev());
    }
}
