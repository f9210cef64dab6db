//! Logical planning: SelectStatement -> LogicalPlan
//!
//! The planner resolves column names against the table schema, expands `*`,
//! substitutes output aliases and ordinals, and rewrites everything above an
//! aggregation to read the aggregate's output columns.

use std::fmt;

use arrow::datatypes::{Schema, SchemaRef};

use super::parser::{SelectItem, SelectStatement};
use super::types::{AggregateExpr, Expr, Value};
use crate::error::{Error, Result};
use crate::utils::resolve_column;

/// One ORDER BY key with its null placement decided.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expr,
    pub asc: bool,
    pub nulls_first: bool,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} NULLS {}",
            self.expr,
            if self.asc { "ASC" } else { "DESC" },
            if self.nulls_first { "FIRST" } else { "LAST" }
        )
    }
}

/// Tree of relational operators executed bottom-up.
#[derive(Debug, Clone)]
pub enum LogicalPlan {
    Scan {
        table: String,
        schema: SchemaRef,
    },
    Filter {
        predicate: Expr,
        input: Box<LogicalPlan>,
    },
    /// Output columns are the group expressions followed by the aggregates,
    /// named by [`aggregate_output_name`].
    Aggregate {
        group_by: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
        input: Box<LogicalPlan>,
    },
    Sort {
        keys: Vec<SortKey>,
        input: Box<LogicalPlan>,
    },
    Projection {
        exprs: Vec<(Expr, String)>,
        input: Box<LogicalPlan>,
    },
    Distinct {
        input: Box<LogicalPlan>,
    },
    Limit {
        skip: usize,
        fetch: Option<usize>,
        input: Box<LogicalPlan>,
    },
}

impl LogicalPlan {
    pub fn input(&self) -> Option<&LogicalPlan> {
        match self {
            LogicalPlan::Scan { .. } => None,
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Projection { input, .. }
            | LogicalPlan::Distinct { input }
            | LogicalPlan::Limit { input, .. } => Some(input),
        }
    }

    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:width$}", "", width = depth * 2)?;
        match self {
            LogicalPlan::Scan { table, schema } => {
                let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
                writeln!(f, "Scan: {} [{}]", table, names.join(", "))?;
            }
            LogicalPlan::Filter { predicate, .. } => writeln!(f, "Filter: {}", predicate)?,
            LogicalPlan::Aggregate {
                group_by,
                aggregates,
                ..
            } => writeln!(
                f,
                "Aggregate: groupBy=[{}], aggr=[{}]",
                join(group_by),
                join(aggregates)
            )?,
            LogicalPlan::Sort { keys, .. } => writeln!(f, "Sort: {}", join(keys))?,
            LogicalPlan::Projection { exprs, .. } => {
                let items: Vec<String> = exprs
                    .iter()
                    .map(|(expr, name)| {
                        if *name == expr.output_name() {
                            name.clone()
                        } else {
                            format!("{} AS {}", expr, name)
                        }
                    })
                    .collect();
                writeln!(f, "Projection: {}", items.join(", "))?;
            }
            LogicalPlan::Distinct { .. } => writeln!(f, "Distinct")?,
            LogicalPlan::Limit { skip, fetch, .. } => match fetch {
                Some(n) => writeln!(f, "Limit: skip={}, fetch={}", skip, n)?,
                None => writeln!(f, "Limit: skip={}, fetch=None", skip)?,
            },
        }
        match self.input() {
            Some(input) => input.fmt_indent(f, depth + 1),
            None => Ok(()),
        }
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the logical plan for a statement over the table `table` with `schema`.
pub fn plan_select(stmt: &SelectStatement, table: &str, schema: &SchemaRef) -> Result<LogicalPlan> {
    if !stmt.table.eq_ignore_ascii_case(table) {
        return Err(Error::UnknownTable(stmt.table.clone()));
    }

    let has_wildcard = stmt.items.iter().any(|i| matches!(i, SelectItem::Wildcard));
    let mut items: Vec<(Expr, String)> = Vec::new();
    for item in &stmt.items {
        match item {
            SelectItem::Wildcard => items.extend(
                schema
                    .fields()
                    .iter()
                    .map(|f| (Expr::column(f.name().clone()), f.name().clone())),
            ),
            SelectItem::Expr { expr, alias } => {
                let name = alias.clone().unwrap_or_else(|| expr.output_name());
                items.push((resolve_columns(expr, schema)?, name));
            }
        }
    }

    let mut plan = LogicalPlan::Scan {
        table: table.to_string(),
        schema: schema.clone(),
    };

    if let Some(filter) = &stmt.filter {
        if filter.contains_aggregate() {
            return Err(Error::Unsupported(
                "aggregate functions are not allowed in WHERE".into(),
            ));
        }
        plan = LogicalPlan::Filter {
            predicate: resolve_columns(filter, schema)?,
            input: Box::new(plan),
        };
    }

    let mut group_by: Vec<Expr> = Vec::new();
    for expr in &stmt.group_by {
        let expr = resolve_output_ref(expr, &items, schema, false, "GROUP BY")?;
        if expr.contains_aggregate() {
            return Err(Error::Unsupported(
                "aggregate functions are not allowed in GROUP BY".into(),
            ));
        }
        if !group_by.contains(&expr) {
            group_by.push(expr);
        }
    }

    let mut keys = Vec::with_capacity(stmt.order_by.len());
    for item in &stmt.order_by {
        keys.push(SortKey {
            expr: resolve_output_ref(&item.expr, &items, schema, true, "ORDER BY")?,
            asc: item.asc,
            nulls_first: item.nulls_first.unwrap_or(false),
        });
    }

    let having = stmt
        .having
        .as_ref()
        .map(|h| resolve_columns(h, schema))
        .transpose()?;

    let is_aggregate = !group_by.is_empty()
        || having.is_some()
        || items.iter().any(|(e, _)| e.contains_aggregate())
        || keys.iter().any(|k| k.expr.contains_aggregate());

    if is_aggregate {
        if has_wildcard {
            return Err(Error::Unsupported(
                "SELECT * cannot be combined with GROUP BY or aggregate functions".into(),
            ));
        }

        let mut aggregates = Vec::new();
        for (expr, _) in &items {
            expr.collect_aggregates(&mut aggregates);
        }
        if let Some(having) = &having {
            having.collect_aggregates(&mut aggregates);
        }
        for key in &keys {
            key.expr.collect_aggregates(&mut aggregates);
        }

        let having = having
            .map(|h| rewrite_for_aggregate(&h, &group_by, &aggregates))
            .transpose()?;
        for key in &mut keys {
            key.expr = rewrite_for_aggregate(&key.expr, &group_by, &aggregates)?;
        }
        for (expr, _) in &mut items {
            *expr = rewrite_for_aggregate(expr, &group_by, &aggregates)?;
        }

        plan = LogicalPlan::Aggregate {
            group_by: group_by.clone(),
            aggregates,
            input: Box::new(plan),
        };
        if let Some(predicate) = having {
            plan = LogicalPlan::Filter {
                predicate,
                input: Box::new(plan),
            };
        }
    }

    if !keys.is_empty() {
        plan = LogicalPlan::Sort {
            keys,
            input: Box::new(plan),
        };
    }

    plan = LogicalPlan::Projection {
        exprs: items,
        input: Box::new(plan),
    };

    if stmt.distinct {
        plan = LogicalPlan::Distinct {
            input: Box::new(plan),
        };
    }

    if stmt.limit.is_some() || stmt.offset > 0 {
        plan = LogicalPlan::Limit {
            skip: stmt.offset,
            fetch: stmt.limit,
            input: Box::new(plan),
        };
    }

    Ok(plan)
}

/// Replace column names with the schema's spelling, failing on unknown columns.
fn resolve_columns(expr: &Expr, schema: &Schema) -> Result<Expr> {
    let mut error = None;
    let resolved = expr.transform(&mut |e| match e {
        Expr::Column(name) => match resolve_column(schema, name) {
            Ok(idx) => Some(Expr::Column(schema.field(idx).name().clone())),
            Err(err) => {
                error.get_or_insert(err);
                Some(e.clone())
            }
        },
        Expr::Aggregate(agg) => match resolve_columns(&agg.arg, schema) {
            Ok(arg) => Some(Expr::Aggregate(AggregateExpr {
                arg: Box::new(arg),
                ..agg.clone()
            })),
            Err(err) => {
                error.get_or_insert(err);
                Some(e.clone())
            }
        },
        _ => None,
    });
    error.map_or(Ok(resolved), Err)
}

/// Resolve a GROUP BY / ORDER BY entry that may name a select item.
///
/// Integer literals are 1-based positions in the select list. A bare name
/// matching an output alias is replaced by the aliased expression; ORDER BY
/// prefers aliases over input columns, GROUP BY prefers input columns.
fn resolve_output_ref(
    expr: &Expr,
    items: &[(Expr, String)],
    schema: &Schema,
    prefer_alias: bool,
    clause: &str,
) -> Result<Expr> {
    match expr {
        Expr::Literal(Value::Int(pos)) => {
            let idx = usize::try_from(*pos)
                .ok()
                .filter(|p| (1..=items.len()).contains(p))
                .ok_or_else(|| {
                    Error::Unsupported(format!(
                        "{} position {} is not in the select list",
                        clause, pos
                    ))
                })?;
            Ok(items[idx - 1].0.clone())
        }
        Expr::Column(name) => {
            let alias = find_alias(items, name);
            if prefer_alias {
                if let Some(expr) = alias {
                    return Ok(expr.clone());
                }
            }
            match resolve_columns(expr, schema) {
                Err(Error::ColumnNotFound(_)) if alias.is_some() => {
                    Ok(alias.cloned().unwrap_or_else(|| expr.clone()))
                }
                other => other,
            }
        }
        _ => resolve_columns(expr, schema),
    }
}

fn find_alias<'a>(items: &'a [(Expr, String)], name: &str) -> Option<&'a Expr> {
    items
        .iter()
        .find(|(_, n)| n == name)
        .or_else(|| items.iter().find(|(_, n)| n.eq_ignore_ascii_case(name)))
        .map(|(e, _)| e)
}

/// Name of the `index`-th output column of an Aggregate node.
///
/// Group keys come first, then aggregates. Positional names keep two
/// expressions with the same text apart.
pub fn aggregate_output_name(index: usize) -> String {
    format!("#{}", index)
}

/// Rewrite an expression to read the output columns of an Aggregate node.
fn rewrite_for_aggregate(
    expr: &Expr,
    group_by: &[Expr],
    aggregates: &[AggregateExpr],
) -> Result<Expr> {
    let mut ungrouped = None;
    let rewritten = expr.transform(&mut |e| {
        if let Some(idx) = group_by.iter().position(|g| g == e) {
            return Some(Expr::Column(aggregate_output_name(idx)));
        }
        match e {
            Expr::Aggregate(agg) => aggregates
                .iter()
                .position(|a| a == agg)
                .map(|idx| Expr::Column(aggregate_output_name(group_by.len() + idx))),
            Expr::Column(name) => {
                ungrouped.get_or_insert_with(|| name.clone());
                Some(e.clone())
            }
            _ => None,
        }
    });
    match ungrouped {
        Some(name) => Err(Error::Unsupported(format!(
            "column \"{}\" must appear in the GROUP BY clause or be used in an aggregate function",
            name
        ))),
        None => Ok(rewritten),
    }
}
