//! Query validation rules applied before planning
//!
//! Each rule inspects the parsed statements and either passes or rejects the
//! query with a short name and a human readable message.

use sqlparser::ast::{Query, SetExpr, Statement, TableFactor};

use crate::error::{Error, Result};

/// A rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub name: &'static str,
    pub message: String,
}

impl From<Rejection> for Error {
    fn from(r: Rejection) -> Self {
        Error::Rejected {
            name: r.name,
            message: r.message,
        }
    }
}

type Rule = fn(&[Statement]) -> Option<Rejection>;

const RULES: &[Rule] = &[
    rule_single_statement,
    rule_read_only,
    rule_no_cte,
    rule_simple_select,
    rule_no_joins,
];

/// Run all rules, returning the single query on success
pub fn revise(statements: &[Statement]) -> Result<&Query> {
    for rule in RULES {
        if let Some(rejection) = rule(statements) {
            return Err(rejection.into());
        }
    }
    match statements {
        [Statement::Query(query)] => Ok(&**query),
        _ => Err(Error::Internal("revised statement is not a query".into())),
    }
}

fn reject(name: &'static str, message: impl Into<String>) -> Option<Rejection> {
    Some(Rejection {
        name,
        message: message.into(),
    })
}

fn query(statements: &[Statement]) -> Option<&Query> {
    match statements {
        [Statement::Query(query)] => Some(&**query),
        _ => None,
    }
}

fn rule_single_statement(statements: &[Statement]) -> Option<Rejection> {
    if statements.len() != 1 {
        return reject(
            "SingleStatement",
            format!("expected exactly one statement, got {}", statements.len()),
        );
    }
    None
}

fn rule_read_only(statements: &[Statement]) -> Option<Rejection> {
    if query(statements).is_none() {
        return reject("ReadOnly", "only SELECT queries are allowed");
    }
    None
}

fn rule_no_cte(statements: &[Statement]) -> Option<Rejection> {
    if query(statements)?.with.is_some() {
        return reject("NoCte", "WITH clauses are not supported");
    }
    None
}

fn rule_simple_select(statements: &[Statement]) -> Option<Rejection> {
    let q = query(statements)?;
    let select = match q.body.as_ref() {
        SetExpr::Select(select) => select,
        SetExpr::SetOperation { .. } => {
            return reject("SimpleSelect", "UNION, INTERSECT and EXCEPT are not supported")
        }
        _ => return reject("SimpleSelect", "only plain SELECT queries are supported"),
    };
    for table in &select.from {
        if !matches!(table.relation, TableFactor::Table { .. }) {
            return reject("SimpleSelect", "FROM must name a table, subqueries are not supported");
        }
    }
    None
}

fn rule_no_joins(statements: &[Statement]) -> Option<Rejection> {
    let q = query(statements)?;
    let SetExpr::Select(select) = q.body.as_ref() else {
        return None;
    };
    let joined = select.from.len() > 1 || select.from.iter().any(|t| !t.joins.is_empty());
    if joined {
        return reject(
            "Joins",
            "joins are not allowed in the query, the engine works on a single table",
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::GenericDialect;
    use sqlparser::parser::Parser;

    fn check(sql: &str) -> Result<()> {
        let statements = Parser::parse_sql(&GenericDialect {}, sql).unwrap();
        revise(&statements).map(|_| ())
    }

    fn rejected_by(sql: &str) -> &'static str {
        match check(sql) {
            Err(Error::Rejected { name, .. }) => name,
            other => panic!("expected rejection for {sql}, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_select_passes() {
        assert!(check("SELECT a, b FROM data WHERE a > 1 ORDER BY b LIMIT 5").is_ok());
    }

    #[test]
    fn test_rejects_joins() {
        assert_eq!(rejected_by("SELECT * FROM data d JOIN other o ON d.id = o.id"), "Joins");
        assert_eq!(rejected_by("SELECT * FROM data, other"), "Joins");
    }

    #[test]
    fn test_join_word_in_column_name_is_fine() {
        assert!(check("SELECT \"left\", join_date FROM data").is_ok());
    }

    #[test]
    fn test_rejects_writes_and_multiple_statements() {
        assert_eq!(rejected_by("DELETE FROM data"), "ReadOnly");
        assert_eq!(rejected_by("SELECT 1 FROM data; SELECT 2 FROM data"), "SingleStatement");
    }

    #[test]
    fn test_rejects_cte_and_set_operations() {
        assert_eq!(rejected_by("WITH x AS (SELECT 1) SELECT * FROM x"), "NoCte");
        assert_eq!(
            rejected_by("SELECT a FROM data UNION SELECT a FROM data"),
            "SimpleSelect"
        );
        assert_eq!(rejected_by("SELECT * FROM (SELECT 1) t"), "SimpleSelect");
    }
}
