//! Utility functions for column lookup and type handling

use arrow::datatypes::{DataType, Schema};

use crate::error::{Error, Result};

/// Resolve a column name against a schema
///
/// An exact match wins; otherwise the name matches case-insensitively as long
/// as exactly one column qualifies.
pub fn resolve_column(schema: &Schema, name: &str) -> Result<usize> {
    if let Some(idx) = schema.fields().iter().position(|f| f.name() == name) {
        return Ok(idx);
    }
    let mut matches = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| f.name().eq_ignore_ascii_case(name))
        .map(|(idx, _)| idx);
    match (matches.next(), matches.next()) {
        (Some(idx), None) => Ok(idx),
        (Some(_), Some(_)) => Err(Error::AmbiguousColumn(name.to_string())),
        _ => Err(Error::ColumnNotFound(name.to_string())),
    }
}

pub fn is_integer(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

pub fn is_floating(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Float16
            | DataType::Float32
            | DataType::Float64
            | DataType::Decimal128(_, _)
            | DataType::Decimal256(_, _)
    )
}

pub fn is_numeric(dt: &DataType) -> bool {
    is_integer(dt) || is_floating(dt)
}

pub fn is_string(dt: &DataType) -> bool {
    matches!(dt, DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View)
}

pub fn is_temporal(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::Field;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("Amount", DataType::Int32, true),
            Field::new("name", DataType::Utf8, true),
            Field::new("NAME", DataType::Utf8, true),
        ])
    }

    #[test]
    fn test_resolve_exact_and_case_insensitive() {
        let schema = schema();
        assert_eq!(resolve_column(&schema, "Amount").unwrap(), 0);
        assert_eq!(resolve_column(&schema, "amount").unwrap(), 0);
        assert_eq!(resolve_column(&schema, "name").unwrap(), 1);
        assert_eq!(resolve_column(&schema, "NAME").unwrap(), 2);
    }

    #[test]
    fn test_resolve_ambiguous_and_missing() {
        let schema = schema();
        assert!(matches!(
            resolve_column(&schema, "Name"),
            Err(Error::AmbiguousColumn(_))
        ));
        assert!(matches!(
            resolve_column(&schema, "price"),
            Err(Error::ColumnNotFound(_))
        ));
    }
}
