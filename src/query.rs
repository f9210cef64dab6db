//! Query orchestration - ties together all components
//!
//! A query is rendered, validated, parsed and planned, then the plan is
//! executed batch by batch against an in-memory [`Table`]. Filter, projection,
//! distinct and limit stream; aggregation and sorting consume their whole
//! input first.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use arrow::array::{ArrayRef, RecordBatch, UInt32Array};
use arrow::compute::{lexsort_to_indices, SortColumn, SortOptions};
use arrow::datatypes::{Field, Schema};
use arrow::row::{OwnedRow, RowConverter, SortField};
use arrow_select::concat::concat_batches;
use arrow_select::take::take_record_batch;
use tracing::{debug, info};

use crate::aggregator::Aggregator;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::expressions::evaluate_to_array;
use crate::filter::apply_filter;
use crate::memory::Table;
use crate::pagination::ResultSet;
use crate::sql::planner::{plan_select, LogicalPlan, SortKey};
use crate::sql::parser::parse_query;
use crate::sql::types::Expr;

/// Shared flag used to stop a running query
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with `Error::Cancelled` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Receives output batches; returning `false` stops the producer early
type Sink<'s> = dyn FnMut(RecordBatch) -> Result<bool> + 's;

/// Executes logical plans against one table
pub struct QueryExecutor<'a> {
    table: &'a Table,
    token: CancelToken,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(table: &'a Table, token: CancelToken) -> Self {
        Self { table, token }
    }

    /// Run a plan and collect its output batches
    ///
    /// At least one batch is always returned so the output schema is known.
    pub fn execute(&self, plan: &LogicalPlan) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        self.for_each_batch(plan, &mut |batch| {
            batches.push(batch);
            Ok(true)
        })?;
        if batches.is_empty() {
            return Err(Error::Internal("plan produced no output batch".into()));
        }
        Ok(batches)
    }

    /// Push the output of `plan` into `sink`, batch by batch
    ///
    /// Returns `false` when the sink asked to stop.
    fn for_each_batch(&self, plan: &LogicalPlan, sink: &mut Sink<'_>) -> Result<bool> {
        match plan {
            LogicalPlan::Scan { table, .. } => {
                if !table.eq_ignore_ascii_case(self.table.name()) {
                    return Err(Error::UnknownTable(table.clone()));
                }
                if self.table.batches().is_empty() {
                    return sink(RecordBatch::new_empty(self.table.schema().clone()));
                }
                for batch in self.table.batches() {
                    self.token.check()?;
                    if !sink(batch.clone())? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }

            LogicalPlan::Filter { predicate, input } => self.for_each_batch(input, &mut |batch| {
                let filtered = apply_filter(&batch, predicate)?;
                sink(filtered)
            }),

            LogicalPlan::Projection { exprs, input } => {
                self.for_each_batch(input, &mut |batch| sink(project(&batch, exprs)?))
            }

            LogicalPlan::Aggregate {
                group_by,
                aggregates,
                input,
            } => {
                let mut aggregator: Option<Aggregator> = None;
                self.for_each_batch(input, &mut |batch| {
                    if aggregator.is_none() {
                        aggregator = Some(Aggregator::new(
                            group_by.clone(),
                            aggregates.clone(),
                            batch.schema_ref(),
                        )?);
                    }
                    if let Some(agg) = aggregator.as_mut() {
                        agg.update_batch(&batch)?;
                    }
                    Ok(true)
                })?;
                self.token.check()?;
                let aggregator = aggregator
                    .ok_or_else(|| Error::Internal("aggregate input produced no batch".into()))?;
                debug!(groups = aggregator.num_groups(), "Aggregation finished");
                sink(aggregator.finish()?)
            }

            LogicalPlan::Sort { keys, input } => {
                let batches = self.collect(input)?;
                self.token.check()?;
                sink(sort_batches(&batches, keys)?)
            }

            LogicalPlan::Distinct { input } => {
                let mut converter: Option<RowConverter> = None;
                let mut seen: HashSet<OwnedRow> = HashSet::new();
                self.for_each_batch(input, &mut |batch| {
                    if converter.is_none() {
                        let fields = batch
                            .schema()
                            .fields()
                            .iter()
                            .map(|f| SortField::new(f.data_type().clone()))
                            .collect();
                        converter = Some(RowConverter::new(fields)?);
                    }
                    let rows = match converter.as_ref() {
                        Some(c) => c.convert_columns(batch.columns())?,
                        None => return Err(Error::Internal("missing row converter".into())),
                    };
                    let keep: Vec<u32> = rows
                        .iter()
                        .enumerate()
                        .filter(|(_, row)| seen.insert(row.owned()))
                        .map(|(i, _)| i as u32)
                        .collect();
                    if keep.len() == batch.num_rows() {
                        return sink(batch);
                    }
                    sink(take_record_batch(&batch, &UInt32Array::from(keep))?)
                })
            }

            LogicalPlan::Limit { skip, fetch, input } => {
                let mut to_skip = *skip;
                let mut remaining = *fetch;
                let mut emitted = false;
                let completed = self.for_each_batch(input, &mut |batch| {
                    let start = to_skip.min(batch.num_rows());
                    to_skip -= start;
                    let available = batch.num_rows() - start;
                    let take = remaining.map_or(available, |r| r.min(available));
                    if take > 0 || !emitted {
                        emitted = true;
                        if !sink(batch.slice(start, take))? {
                            return Ok(false);
                        }
                    }
                    if let Some(r) = remaining.as_mut() {
                        *r -= take;
                        if *r == 0 {
                            // Enough rows: stop the producers below
                            return Ok(false);
                        }
                    }
                    Ok(true)
                })?;
                // A satisfied limit is not a stop request from our own sink
                Ok(completed || remaining == Some(0))
            }
        }
    }

    fn collect(&self, plan: &LogicalPlan) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        self.for_each_batch(plan, &mut |batch| {
            batches.push(batch);
            Ok(true)
        })?;
        Ok(batches)
    }
}

/// Evaluate projection expressions into a new batch
fn project(batch: &RecordBatch, exprs: &[(Expr, String)]) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(exprs.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(exprs.len());
    for (expr, name) in exprs {
        let array = evaluate_to_array(expr, batch)?;
        fields.push(Field::new(name, array.data_type().clone(), true));
        columns.push(array);
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Concatenate and sort batches by the given keys
fn sort_batches(batches: &[RecordBatch], keys: &[SortKey]) -> Result<RecordBatch> {
    let schema = batches
        .first()
        .map(|b| b.schema())
        .ok_or_else(|| Error::Internal("sort input produced no batch".into()))?;
    let batch = concat_batches(&schema, batches)?;
    if batch.num_rows() < 2 {
        return Ok(batch);
    }
    let columns = keys
        .iter()
        .map(|key| {
            Ok(SortColumn {
                values: evaluate_to_array(&key.expr, &batch)?,
                options: Some(SortOptions {
                    descending: !key.asc,
                    nulls_first: key.nulls_first,
                }),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let indices = lexsort_to_indices(&columns, None)?;
    Ok(take_record_batch(&batch, &indices)?)
}

/// Render, validate, parse and plan a query against `table`
pub fn prepare(table: &Table, sql: &str, config: &EngineConfig) -> Result<LogicalPlan> {
    let sql = config.render_vars(sql);
    let statement = parse_query(&sql)?;
    let plan = plan_select(&statement, table.name(), table.schema())?;
    debug!(plan = %plan, "Planned query");
    Ok(plan)
}

/// Plan and run a query, returning a paged result
pub fn execute_sql(
    table: &Table,
    sql: &str,
    config: &EngineConfig,
    token: CancelToken,
) -> Result<ResultSet> {
    let start = Instant::now();
    let plan = prepare(table, sql, config)?;
    match execute_plan(table, &plan, config, token, start) {
        Err(Error::Cancelled) => {
            info!(sql, "Query cancelled");
            Err(Error::Cancelled)
        }
        other => other,
    }
}

/// Run an already planned query; `start` is when planning began
pub fn execute_plan(
    table: &Table,
    plan: &LogicalPlan,
    config: &EngineConfig,
    token: CancelToken,
    start: Instant,
) -> Result<ResultSet> {
    let batches = QueryExecutor::new(table, token).execute(plan)?;
    let result = Table::from_batches(table.name(), batches)?;
    let elapsed = start.elapsed();
    info!(
        rows = result.num_rows(),
        columns = result.num_columns(),
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "Query finished"
    );
    Ok(ResultSet::new(Arc::new(result), config.page_size, elapsed))
}

/// A query running on its own worker thread
#[derive(Debug)]
pub struct QueryHandle {
    sql: String,
    token: CancelToken,
    handle: JoinHandle<Result<ResultSet>>,
}

impl QueryHandle {
    /// Start executing `sql` against `table` in the background
    pub fn spawn(table: Arc<Table>, sql: impl Into<String>, config: EngineConfig) -> Result<Self> {
        let sql = sql.into();
        let token = CancelToken::new();
        let worker_sql = sql.clone();
        let worker_token = token.clone();
        let handle = thread::Builder::new()
            .name("goose-query".into())
            .spawn(move || execute_sql(&table, &worker_sql, &config, worker_token))?;
        debug!(sql = %sql, "Query submitted");
        Ok(Self { sql, token, handle })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Request cancellation; the worker stops at its next batch boundary
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker and return its result
    pub fn join(self) -> Result<ResultSet> {
        self.handle
            .join()
            .map_err(|_| Error::Internal("query worker panicked".into()))?
    }
}
