//! Error types shared by the whole engine

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use sqlparser::parser::ParserError;
use thiserror::Error;

/// Engine errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQL parse error: {0}")]
    Parse(#[from] ParserError),

    #[error("Query is empty")]
    EmptyQuery,

    /// A validation rule refused the query before planning.
    #[error("{name}: {message}")]
    Rejected { name: &'static str, message: String },

    #[error("Unsupported SQL: {0}")]
    Unsupported(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Ambiguous column reference: {0}")]
    AmbiguousColumn(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Numeric overflow: {0}")]
    Overflow(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid page {0}: pages are numbered from 1")]
    InvalidPage(usize),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Query cancelled")]
    Cancelled,

    #[error("No query is running")]
    NoRunningQuery,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
