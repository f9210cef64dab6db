//! Core type definitions for the SQL engine.
//!
//! These types form the intermediate representation between the sqlparser AST
//! and the logical plan. They are independent of the parser library and of the
//! Arrow kernels that evaluate them.

use std::fmt;

use arrow::datatypes::DataType;

/// Literal values in SQL expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Str(v) => write!(f, "'{}'", v.replace('\'', "''")),
        }
    }
}

/// Binary operators: comparison, arithmetic and logical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    And,
    Or,
}

impl Operator {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::NotEq
                | Operator::Lt
                | Operator::LtEq
                | Operator::Gt
                | Operator::GtEq
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Operator::Plus | Operator::Minus | Operator::Multiply | Operator::Divide | Operator::Modulo
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Operator::And | Operator::Or)
    }

    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            Operator::Or => 1,
            Operator::And => 2,
            Operator::Eq
            | Operator::NotEq
            | Operator::Lt
            | Operator::LtEq
            | Operator::Gt
            | Operator::GtEq => 3,
            Operator::Plus | Operator::Minus => 4,
            Operator::Multiply | Operator::Divide | Operator::Modulo => 5,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Modulo => "%",
            Operator::And => "AND",
            Operator::Or => "OR",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggFunc::Count => write!(f, "COUNT"),
            AggFunc::Sum => write!(f, "SUM"),
            AggFunc::Avg => write!(f, "AVG"),
            AggFunc::Min => write!(f, "MIN"),
            AggFunc::Max => write!(f, "MAX"),
        }
    }
}

impl AggFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggFunc::Count),
            "SUM" => Some(AggFunc::Sum),
            "AVG" | "MEAN" => Some(AggFunc::Avg),
            "MIN" => Some(AggFunc::Min),
            "MAX" => Some(AggFunc::Max),
            _ => None,
        }
    }
}

/// An aggregate function call.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub func: AggFunc,
    /// The argument expression. For COUNT(*), this is `Expr::Wildcard`.
    pub arg: Box<Expr>,
    /// Only the first occurrence of each argument value is aggregated.
    pub distinct: bool,
}

impl fmt::Display for AggregateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.distinct {
            write!(f, "{}(DISTINCT {})", self.func, self.arg)
        } else {
            write!(f, "{}({})", self.func, self.arg)
        }
    }
}

/// SQL expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference by name.
    Column(String),
    /// Literal value.
    Literal(Value),
    /// Binary operation: left op right.
    Binary {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
    },
    /// Logical negation.
    Not(Box<Expr>),
    /// Arithmetic negation.
    Negate(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// Pattern match with `%` and `_` wildcards.
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
        case_insensitive: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Cast {
        expr: Box<Expr>,
        data_type: DataType,
    },
    Aggregate(AggregateExpr),
    /// Wildcard (*) in SELECT or COUNT(*).
    Wildcard,
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn binary(left: Expr, op: Operator, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Check whether any aggregate call appears in this expression.
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if matches!(e, Expr::Aggregate(_)) {
                found = true;
            }
        });
        found
    }

    /// Collect aggregate calls, without duplicates, in order of appearance.
    pub fn collect_aggregates(&self, out: &mut Vec<AggregateExpr>) {
        self.visit(&mut |e| {
            if let Expr::Aggregate(agg) = e {
                if !out.contains(agg) {
                    out.push(agg.clone());
                }
            }
        });
    }

    /// Call `f` on this node and every descendant (pre-order).
    ///
    /// Aggregate arguments are not descended into.
    pub fn visit(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Binary { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Expr::Not(e) | Expr::Negate(e) => e.visit(f),
            Expr::IsNull { expr, .. } | Expr::Cast { expr, .. } => expr.visit(f),
            Expr::Like { expr, pattern, .. } => {
                expr.visit(f);
                pattern.visit(f);
            }
            Expr::InList { expr, list, .. } => {
                expr.visit(f);
                for item in list {
                    item.visit(f);
                }
            }
            Expr::Between { expr, low, high, .. } => {
                expr.visit(f);
                low.visit(f);
                high.visit(f);
            }
            Expr::Column(_) | Expr::Literal(_) | Expr::Aggregate(_) | Expr::Wildcard => {}
        }
    }

    /// Rebuild the tree bottom-up, letting `f` replace any node.
    ///
    /// `f` sees a node before its children; returning `Some` replaces the node
    /// without descending further.
    pub fn transform(&self, f: &mut dyn FnMut(&Expr) -> Option<Expr>) -> Expr {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        let mut t = |e: &Expr| Box::new(e.transform(f));
        match self {
            Expr::Binary { left, op, right } => Expr::Binary {
                left: t(left),
                op: *op,
                right: t(right),
            },
            Expr::Not(e) => Expr::Not(t(e)),
            Expr::Negate(e) => Expr::Negate(t(e)),
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: t(expr),
                negated: *negated,
            },
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => Expr::Like {
                expr: t(expr),
                pattern: t(pattern),
                negated: *negated,
                case_insensitive: *case_insensitive,
            },
            Expr::InList { expr, list, negated } => {
                let expr = t(expr);
                let list = list.iter().map(|e| *t(e)).collect();
                Expr::InList {
                    expr,
                    list,
                    negated: *negated,
                }
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Expr::Between {
                expr: t(expr),
                low: t(low),
                high: t(high),
                negated: *negated,
            },
            Expr::Cast { expr, data_type } => Expr::Cast {
                expr: t(expr),
                data_type: data_type.clone(),
            },
            Expr::Column(_) | Expr::Literal(_) | Expr::Aggregate(_) | Expr::Wildcard => self.clone(),
        }
    }

    /// Name used for an unaliased output column.
    pub fn output_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(name) => write!(f, "{}", name),
            Expr::Literal(val) => write!(f, "{}", val),
            Expr::Binary { left, op, right } => {
                if op.is_logical() {
                    write!(f, "({} {} {})", left, op, right)
                } else {
                    fmt_operand(f, left, *op, false)?;
                    write!(f, " {} ", op)?;
                    fmt_operand(f, right, *op, true)
                }
            }
            Expr::Not(e) => write!(f, "NOT {}", e),
            Expr::Negate(e) => match e.as_ref() {
                Expr::Binary { op, .. } if !op.is_logical() => write!(f, "-({})", e),
                _ => write!(f, "-{}", e),
            },
            Expr::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => write!(
                f,
                "{} {}{} {}",
                expr,
                if *negated { "NOT " } else { "" },
                if *case_insensitive { "ILIKE" } else { "LIKE" },
                pattern
            ),
            Expr::InList { expr, list, negated } => {
                let items: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                write!(
                    f,
                    "{} {}IN ({})",
                    expr,
                    if *negated { "NOT " } else { "" },
                    items.join(", ")
                )
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "{} {}BETWEEN {} AND {}",
                expr,
                if *negated { "NOT " } else { "" },
                low,
                high
            ),
            Expr::Cast { expr, data_type } => write!(f, "CAST({} AS {})", expr, data_type),
            Expr::Aggregate(agg) => write!(f, "{}", agg),
            Expr::Wildcard => write!(f, "*"),
        }
    }
}

/// Write one side of a non-logical binary operator, parenthesized when the
/// text would otherwise regroup.
///
/// Logical operators always print their own parentheses.
fn fmt_operand(f: &mut fmt::Formatter<'_>, operand: &Expr, parent: Operator, right: bool) -> fmt::Result {
    match operand {
        Expr::Binary { op, .. }
            if !op.is_logical()
                && (op.precedence() < parent.precedence()
                    || (op.precedence() == parent.precedence()
                        && (right || parent.is_comparison()))) =>
        {
            write!(f, "({})", operand)
        }
        _ => write!(f, "{}", operand),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_star() -> Expr {
        Expr::Aggregate(AggregateExpr {
            func: AggFunc::Count,
            arg: Box::new(Expr::Wildcard),
            distinct: false,
        })
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::Str("it's".into()).to_string(), "'it''s'");
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Boolean(true).to_string(), "TRUE");
    }

    #[test]
    fn test_expr_display() {
        let expr = Expr::binary(
            Expr::column("amount"),
            Operator::Gt,
            Expr::Literal(Value::Int(100)),
        );
        assert_eq!(expr.to_string(), "amount > 100");

        let compound = Expr::binary(expr.clone(), Operator::And, Expr::Not(Box::new(expr)));
        assert_eq!(compound.to_string(), "(amount > 100 AND NOT amount > 100)");
    }

    #[test]
    fn test_arithmetic_display_keeps_grouping() {
        let col = Expr::column;
        let left_nested = Expr::binary(
            Expr::binary(col("a"), Operator::Minus, col("b")),
            Operator::Minus,
            col("c"),
        );
        let right_nested = Expr::binary(
            col("a"),
            Operator::Minus,
            Expr::binary(col("b"), Operator::Minus, col("c")),
        );
        assert_eq!(left_nested.to_string(), "a - b - c");
        assert_eq!(right_nested.to_string(), "a - (b - c)");
        assert_ne!(left_nested.to_string(), right_nested.to_string());

        let product = Expr::binary(
            col("a"),
            Operator::Multiply,
            Expr::binary(col("b"), Operator::Plus, col("c")),
        );
        assert_eq!(product.to_string(), "a * (b + c)");

        let sum = Expr::binary(
            Expr::binary(col("a"), Operator::Multiply, col("b")),
            Operator::Plus,
            Expr::Literal(Value::Float(1.0)),
        );
        assert_eq!(sum.to_string(), "a * b + 1.0");
        assert_eq!(Expr::Negate(Box::new(sum)).to_string(), "-(a * b + 1.0)");
    }

    #[test]
    fn test_aggregate_display() {
        assert_eq!(count_star().to_string(), "COUNT(*)");
        let distinct = Expr::Aggregate(AggregateExpr {
            func: AggFunc::Sum,
            arg: Box::new(Expr::column("x")),
            distinct: true,
        });
        assert_eq!(distinct.to_string(), "SUM(DISTINCT x)");
    }

    #[test]
    fn test_collect_aggregates_dedups() {
        let expr = Expr::binary(count_star(), Operator::Plus, count_star());
        let mut aggs = Vec::new();
        expr.collect_aggregates(&mut aggs);
        assert_eq!(aggs.len(), 1);
        assert!(expr.contains_aggregate());
        assert!(!Expr::column("a").contains_aggregate());
    }

    #[test]
    fn test_transform_replaces_columns() {
        let expr = Expr::binary(Expr::column("a"), Operator::Plus, Expr::column("b"));
        let renamed = expr.transform(&mut |e| match e {
            Expr::Column(name) if name == "a" => Some(Expr::column("z")),
            _ => None,
        });
        assert_eq!(renamed.to_string(), "z + b");
    }

    #[test]
    fn test_agg_func_from_name() {
        assert_eq!(AggFunc::from_name("count"), Some(AggFunc::Count));
        assert_eq!(AggFunc::from_name("Avg"), Some(AggFunc::Avg));
        assert_eq!(AggFunc::from_name("median"), None);
    }
}
