//! goose-sql: an embedded analytic SQL engine over a single columnar file
//!
//! A Parquet, CSV or JSON file is loaded into an in-memory Arrow table and
//! queried with a small SQL subset (projection, filter, aggregation,
//! ORDER BY, LIMIT/OFFSET). Results are paged, and every query runs on its
//! own cancellable worker.
//!
//! ```no_run
//! use goose_sql::{EngineConfig, Session};
//!
//! let mut session = Session::open("data/lineitem.parquet", EngineConfig::default())?;
//! session.execute("SELECT l_returnflag, COUNT(*) FROM data GROUP BY l_returnflag")?;
//! let first = session.page(1)?;
//! # Ok::<(), goose_sql::Error>(())
//! ```

pub mod aggregator;
pub mod config;
pub mod error;
pub mod expressions;
pub mod filter;
pub mod memory;
pub mod pagination;
pub mod query;
pub mod reader;
pub mod session;
pub mod sql;
pub mod stats;
pub mod utils;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use memory::Table;
pub use pagination::{Pager, ResultSet};
pub use query::{execute_sql, CancelToken, QueryHandle};
pub use reader::{load_table, FileFormat, LoadOptions};
pub use session::Session;
pub use stats::{ColumnStats, ValueCount, ValueCounts};
