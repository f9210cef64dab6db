//! SQL parser wrapping `sqlparser-rs` for the supported SELECT subset.
//!
//! Converts a SQL string into a [`SelectStatement`]. Statement-level checks
//! (single statement, read-only, no joins) are delegated to the revisor;
//! everything this module cannot express is reported as unsupported.

use arrow::datatypes::{DataType, TimeUnit};
use sqlparser::ast::{
    self as sp, Distinct, DuplicateTreatment, Expr as SpExpr, FunctionArg, FunctionArgExpr,
    GroupByExpr, SetExpr, TableFactor,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use super::revisor::revise;
use super::types::{AggFunc, AggregateExpr, Expr, Operator, Value};
use crate::error::{Error, Result};

/// One item of the SELECT list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*` (qualified or not).
    Wildcard,
    Expr { expr: Expr, alias: Option<String> },
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub asc: bool,
    /// Explicit NULLS FIRST / NULLS LAST.
    pub nulls_first: Option<bool>,
}

/// A parsed single-table SELECT.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub table: String,
    pub items: Vec<SelectItem>,
    pub filter: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub distinct: bool,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Parse a SQL query string into a SelectStatement.
///
/// The parser handles:
/// - Column references, aliases and wildcards
/// - Aggregate functions: COUNT, SUM, AVG, MIN, MAX (including COUNT(*) and DISTINCT)
/// - WHERE / HAVING with comparisons, arithmetic, AND/OR/NOT, IS NULL, LIKE,
///   ILIKE, IN, BETWEEN and CAST
/// - GROUP BY, SELECT DISTINCT
/// - ORDER BY with ASC/DESC and NULLS FIRST/LAST
/// - LIMIT and OFFSET literals
pub fn parse_query(sql: &str) -> Result<SelectStatement> {
    if sql.trim().is_empty() {
        return Err(Error::EmptyQuery);
    }
    let dialect = GenericDialect {};
    let statements = Parser::parse_sql(&dialect, sql)?;
    let query = revise(&statements)?;
    convert_query(query)
}

/// Convert a sqlparser Query to our SelectStatement.
fn convert_query(query: &sp::Query) -> Result<SelectStatement> {
    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select.as_ref(),
        _ => return Err(Error::Unsupported("only simple SELECT queries are supported".into())),
    };

    if query.fetch.is_some() {
        return Err(Error::Unsupported("FETCH is not supported, use LIMIT".into()));
    }
    if !query.limit_by.is_empty() {
        return Err(Error::Unsupported("LIMIT BY is not supported".into()));
    }
    if select.top.is_some() {
        return Err(Error::Unsupported("TOP is not supported, use LIMIT".into()));
    }

    let table = extract_table_name(select)?;

    let distinct = match &select.distinct {
        None => false,
        Some(Distinct::Distinct) => true,
        Some(Distinct::On(_)) => return Err(Error::Unsupported("DISTINCT ON is not supported".into())),
    };

    let items = select
        .projection
        .iter()
        .map(convert_select_item)
        .collect::<Result<Vec<_>>>()?;

    let filter = select.selection.as_ref().map(convert_expr).transpose()?;
    let having = select.having.as_ref().map(convert_expr).transpose()?;
    let group_by = convert_group_by(&select.group_by)?;

    let order_by = match &query.order_by {
        Some(order_by) => order_by
            .exprs
            .iter()
            .map(|o| {
                Ok(OrderByItem {
                    expr: convert_expr(&o.expr)?,
                    asc: o.asc.unwrap_or(true),
                    nulls_first: o.nulls_first,
                })
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    let limit = query.limit.as_ref().map(|e| extract_count(e, "LIMIT")).transpose()?;
    let offset = match &query.offset {
        Some(offset) => extract_count(&offset.value, "OFFSET")?,
        None => 0,
    };

    Ok(SelectStatement {
        table,
        items,
        filter,
        group_by,
        having,
        distinct,
        order_by,
        limit,
        offset,
    })
}

/// Extract the single table name from the FROM clause.
fn extract_table_name(select: &sp::Select) -> Result<String> {
    let table_with_joins = match select.from.as_slice() {
        [] => return Err(Error::Unsupported("missing FROM clause".into())),
        [table] => table,
        _ => return Err(Error::Unsupported("multiple FROM tables are not supported".into())),
    };
    match &table_with_joins.relation {
        TableFactor::Table { name, .. } => {
            let parts: Vec<String> = name.0.iter().map(|ident| ident.value.clone()).collect();
            Ok(parts.join("."))
        }
        _ => Err(Error::Unsupported(
            "only simple table references are supported in FROM".into(),
        )),
    }
}

fn convert_select_item(item: &sp::SelectItem) -> Result<SelectItem> {
    match item {
        sp::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::Expr {
            expr: convert_expr(expr)?,
            alias: None,
        }),
        sp::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem::Expr {
            expr: convert_expr(expr)?,
            alias: Some(alias.value.clone()),
        }),
        sp::SelectItem::Wildcard(_) | sp::SelectItem::QualifiedWildcard(_, _) => {
            Ok(SelectItem::Wildcard)
        }
    }
}

/// Convert GROUP BY clause to our Expr types.
fn convert_group_by(group_by: &GroupByExpr) -> Result<Vec<Expr>> {
    match group_by {
        GroupByExpr::All(_) => Err(Error::Unsupported("GROUP BY ALL is not supported".into())),
        GroupByExpr::Expressions(exprs, modifiers) => {
            if !modifiers.is_empty() {
                return Err(Error::Unsupported("GROUP BY modifiers are not supported".into()));
            }
            exprs.iter().map(convert_expr).collect()
        }
    }
}

/// Convert a sqlparser expression to our Expr type.
fn convert_expr(expr: &SpExpr) -> Result<Expr> {
    match expr {
        SpExpr::Identifier(ident) => Ok(Expr::Column(ident.value.clone())),

        // Compound identifier (e.g., t.col): the table qualifier is dropped
        SpExpr::CompoundIdentifier(parts) => parts
            .last()
            .map(|i| Expr::Column(i.value.clone()))
            .ok_or_else(|| Error::Unsupported("empty compound identifier".into())),

        SpExpr::Value(val) => convert_value(val).map(Expr::Literal),

        SpExpr::TypedString { data_type, value } => Ok(Expr::Cast {
            expr: Box::new(Expr::Literal(Value::Str(value.clone()))),
            data_type: convert_data_type(data_type)?,
        }),

        SpExpr::UnaryOp { op, expr: inner } => {
            let inner = convert_expr(inner)?;
            match op {
                sp::UnaryOperator::Plus => Ok(inner),
                sp::UnaryOperator::Minus => Ok(match inner {
                    Expr::Literal(Value::Int(n)) => Expr::Literal(Value::Int(-n)),
                    Expr::Literal(Value::Float(n)) => Expr::Literal(Value::Float(-n)),
                    other => Expr::Negate(Box::new(other)),
                }),
                sp::UnaryOperator::Not => Ok(Expr::Not(Box::new(inner))),
                _ => Err(Error::Unsupported(format!("unary operator {} is not supported", op))),
            }
        }

        SpExpr::BinaryOp { left, op, right } => {
            let op = convert_binop(op)?;
            Ok(Expr::binary(convert_expr(left)?, op, convert_expr(right)?))
        }

        SpExpr::Nested(inner) => convert_expr(inner),

        SpExpr::IsNull(inner) => Ok(Expr::IsNull {
            expr: Box::new(convert_expr(inner)?),
            negated: false,
        }),
        SpExpr::IsNotNull(inner) => Ok(Expr::IsNull {
            expr: Box::new(convert_expr(inner)?),
            negated: true,
        }),

        SpExpr::Like {
            negated,
            expr,
            pattern,
            escape_char,
            ..
        } => convert_like(expr, pattern, *negated, false, escape_char.is_some()),
        SpExpr::ILike {
            negated,
            expr,
            pattern,
            escape_char,
            ..
        } => convert_like(expr, pattern, *negated, true, escape_char.is_some()),

        SpExpr::InList {
            expr,
            list,
            negated,
        } => Ok(Expr::InList {
            expr: Box::new(convert_expr(expr)?),
            list: list.iter().map(convert_expr).collect::<Result<Vec<_>>>()?,
            negated: *negated,
        }),

        SpExpr::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(Expr::Between {
            expr: Box::new(convert_expr(expr)?),
            low: Box::new(convert_expr(low)?),
            high: Box::new(convert_expr(high)?),
            negated: *negated,
        }),

        SpExpr::Cast {
            expr, data_type, ..
        } => Ok(Expr::Cast {
            expr: Box::new(convert_expr(expr)?),
            data_type: convert_data_type(data_type)?,
        }),

        SpExpr::Function(func) => convert_function(func),

        _ => Err(Error::Unsupported(format!("expression not supported: {}", expr))),
    }
}

fn convert_like(
    expr: &SpExpr,
    pattern: &SpExpr,
    negated: bool,
    case_insensitive: bool,
    has_escape: bool,
) -> Result<Expr> {
    if has_escape {
        return Err(Error::Unsupported(
            "LIKE ... ESCAPE is not supported, use a backslash to escape wildcards".into(),
        ));
    }
    Ok(Expr::Like {
        expr: Box::new(convert_expr(expr)?),
        pattern: Box::new(convert_expr(pattern)?),
        negated,
        case_insensitive,
    })
}

/// Convert a sqlparser Value to our Value type.
fn convert_value(val: &sp::Value) -> Result<Value> {
    match val {
        sp::Value::Number(s, _) => {
            // Try integer first, then float
            if let Ok(i) = s.parse::<i64>() {
                Ok(Value::Int(i))
            } else if let Ok(f) = s.parse::<f64>() {
                Ok(Value::Float(f))
            } else {
                Err(Error::Unsupported(format!("cannot parse number: {}", s)))
            }
        }
        sp::Value::SingleQuotedString(s) => Ok(Value::Str(s.clone())),
        sp::Value::Boolean(b) => Ok(Value::Boolean(*b)),
        sp::Value::Null => Ok(Value::Null),
        _ => Err(Error::Unsupported(format!("literal not supported: {}", val))),
    }
}

/// Convert a sqlparser binary operator to ours.
fn convert_binop(op: &sp::BinaryOperator) -> Result<Operator> {
    match op {
        sp::BinaryOperator::Eq => Ok(Operator::Eq),
        sp::BinaryOperator::NotEq => Ok(Operator::NotEq),
        sp::BinaryOperator::Lt => Ok(Operator::Lt),
        sp::BinaryOperator::LtEq => Ok(Operator::LtEq),
        sp::BinaryOperator::Gt => Ok(Operator::Gt),
        sp::BinaryOperator::GtEq => Ok(Operator::GtEq),
        sp::BinaryOperator::Plus => Ok(Operator::Plus),
        sp::BinaryOperator::Minus => Ok(Operator::Minus),
        sp::BinaryOperator::Multiply => Ok(Operator::Multiply),
        sp::BinaryOperator::Divide => Ok(Operator::Divide),
        sp::BinaryOperator::Modulo => Ok(Operator::Modulo),
        sp::BinaryOperator::And => Ok(Operator::And),
        sp::BinaryOperator::Or => Ok(Operator::Or),
        _ => Err(Error::Unsupported(format!(
            "binary operator {} is not supported",
            op
        ))),
    }
}

/// Map a SQL type name onto the Arrow type it casts to.
fn convert_data_type(data_type: &sp::DataType) -> Result<DataType> {
    let name = data_type.to_string().to_ascii_uppercase();
    let base = name
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    match base {
        "VARCHAR" | "TEXT" | "STRING" | "CHAR" | "CHARACTER" => Ok(DataType::Utf8),
        "TINYINT" | "INT1" => Ok(DataType::Int8),
        "SMALLINT" | "INT2" => Ok(DataType::Int16),
        "INT" | "INTEGER" | "INT4" => Ok(DataType::Int32),
        "BIGINT" | "INT8" | "LONG" => Ok(DataType::Int64),
        "REAL" | "FLOAT4" => Ok(DataType::Float32),
        "DOUBLE" | "FLOAT" | "FLOAT8" | "DECIMAL" | "NUMERIC" => Ok(DataType::Float64),
        "BOOLEAN" | "BOOL" => Ok(DataType::Boolean),
        "DATE" => Ok(DataType::Date32),
        "TIMESTAMP" | "DATETIME" => Ok(DataType::Timestamp(TimeUnit::Microsecond, None)),
        _ => Err(Error::Unsupported(format!("cast to {} is not supported", name))),
    }
}

/// Convert a sqlparser Function to our aggregate Expr.
fn convert_function(func: &sp::Function) -> Result<Expr> {
    let name = func
        .name
        .0
        .iter()
        .map(|i| i.value.clone())
        .collect::<Vec<_>>()
        .join(".");

    let agg_func = AggFunc::from_name(&name)
        .ok_or_else(|| Error::Unsupported(format!("function not supported: {}", name)))?;

    if func.over.is_some() {
        return Err(Error::Unsupported("window functions are not supported".into()));
    }
    if func.filter.is_some() {
        return Err(Error::Unsupported("aggregate FILTER is not supported".into()));
    }

    let (args, distinct) = match &func.args {
        sp::FunctionArguments::None => (Vec::new(), false),
        sp::FunctionArguments::Subquery(_) => {
            return Err(Error::Unsupported("subquery arguments are not supported".into()));
        }
        sp::FunctionArguments::List(arg_list) => (
            arg_list.args.clone(),
            matches!(arg_list.duplicate_treatment, Some(DuplicateTreatment::Distinct)),
        ),
    };

    let arg = match args.as_slice() {
        // COUNT() with no args -> treat as COUNT(*)
        [] if agg_func == AggFunc::Count => Expr::Wildcard,
        [FunctionArg::Unnamed(arg)] => match arg {
            FunctionArgExpr::Expr(expr) => convert_expr(expr)?,
            FunctionArgExpr::Wildcard | FunctionArgExpr::QualifiedWildcard(_) => Expr::Wildcard,
        },
        _ => {
            return Err(Error::Unsupported(format!(
                "{} takes exactly one argument",
                agg_func
            )))
        }
    };

    if matches!(arg, Expr::Wildcard) && (agg_func != AggFunc::Count || distinct) {
        return Err(Error::Unsupported(format!("{}(*) is not supported", agg_func)));
    }
    if arg.contains_aggregate() {
        return Err(Error::Unsupported("nested aggregate functions are not supported".into()));
    }

    Ok(Expr::Aggregate(AggregateExpr {
        func: agg_func,
        arg: Box::new(arg),
        distinct,
    }))
}

/// Extract a LIMIT/OFFSET count from a sqlparser expression.
fn extract_count(expr: &SpExpr, clause: &str) -> Result<usize> {
    match expr {
        SpExpr::Value(sp::Value::Number(s, _)) => s
            .parse::<usize>()
            .map_err(|_| Error::Unsupported(format!("invalid {} value: {}", clause, s))),
        _ => Err(Error::Unsupported(format!(
            "{} must be a non-negative integer literal",
            clause
        ))),
    }
}
