//! SQL front end: validation, parsing and logical planning.

pub mod parser;
pub mod planner;
pub mod revisor;
pub mod types;

pub use parser::{parse_query, OrderByItem, SelectItem, SelectStatement};
pub use planner::{plan_select, LogicalPlan, SortKey};
pub use types::{AggFunc, AggregateExpr, Expr, Operator, Value};
