//! A loaded file with its current query view
//!
//! The session owns the source table read from disk and the result of the
//! last query (the view). Paging and statistics read the view; search and
//! value-count comparisons go back to the source.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow::array::{ArrayRef, RecordBatch};
use arrow::datatypes::DataType;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::memory::Table;
use crate::pagination::ResultSet;
use crate::query::{execute_plan, execute_sql, CancelToken, QueryHandle};
use crate::reader::load_table;
use crate::sql::planner::LogicalPlan;
use crate::sql::types::{Expr, Value};
use crate::stats::{self, ColumnStats, ValueCounts};
use crate::utils::resolve_column;

/// One opened file: the source table plus the view of the last query
///
/// At most one background query runs at a time; starting another one, or
/// dropping the session, cancels it.
pub struct Session {
    path: PathBuf,
    config: EngineConfig,
    source: Arc<Table>,
    view: ResultSet,
    last_query: Option<String>,
    running: Option<QueryHandle>,
}

impl Session {
    /// Load `path` as the source table; the initial view is the whole table
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let source: Arc<Table> = load_table(&path, &config.table_name, &config.load_options())?.into();
        let view = ResultSet::new(source.clone(), config.page_size, Duration::ZERO);
        info!(
            path = %path.display(),
            table = %config.table_name,
            rows = source.num_rows(),
            "Session opened"
        );
        Ok(Self {
            path,
            config,
            source,
            view,
            last_query: None,
            running: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<Table> {
        &self.source
    }

    pub fn view(&self) -> &ResultSet {
        &self.view
    }

    /// Run a query to completion and make its result the view
    ///
    /// Blank SQL leaves the view untouched.
    pub fn execute(&mut self, sql: &str) -> Result<&ResultSet> {
        if sql.trim().is_empty() {
            return Ok(&self.view);
        }
        self.cancel_running();
        let result = execute_sql(&self.source, sql, &self.config, CancelToken::new())?;
        self.install(sql.to_string(), result);
        Ok(&self.view)
    }

    /// Start a query in the background, cancelling any query still running
    pub fn submit(&mut self, sql: &str) -> Result<()> {
        if sql.trim().is_empty() {
            return Ok(());
        }
        self.cancel_running();
        self.running = Some(QueryHandle::spawn(
            self.source.clone(),
            sql,
            self.config.clone(),
        )?);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the background query
    pub fn cancel(&mut self) -> Result<()> {
        if self.running.is_none() {
            return Err(Error::NoRunningQuery);
        }
        self.cancel_running();
        Ok(())
    }

    /// Install the background result if the query has finished
    ///
    /// Returns `Ok(true)` when the view changed.
    pub fn poll(&mut self) -> Result<bool> {
        if !self.running.as_ref().is_some_and(|h| h.is_finished()) {
            return Ok(false);
        }
        self.wait()?;
        Ok(true)
    }

    /// Block until the background query finishes and install its result
    pub fn wait(&mut self) -> Result<&ResultSet> {
        let handle = self.running.take().ok_or(Error::NoRunningQuery)?;
        let sql = handle.sql().to_string();
        let result = handle.join()?;
        self.install(sql, result);
        Ok(&self.view)
    }

    /// Show the whole source again
    pub fn reset(&mut self) {
        self.cancel_running();
        self.view = ResultSet::new(self.source.clone(), self.config.page_size, Duration::ZERO);
        self.last_query = None;
    }

    /// Re-read the file from disk and reset the view
    pub fn reload(&mut self) -> Result<()> {
        self.cancel_running();
        let table = load_table(&self.path, &self.config.table_name, &self.config.load_options())?;
        info!(path = %self.path.display(), rows = table.num_rows(), "Reloaded file");
        self.source = Arc::new(table);
        self.reset();
        Ok(())
    }

    pub fn page(&self, page: usize) -> Result<RecordBatch> {
        self.view.page(page)
    }

    pub fn total_pages(&self) -> usize {
        self.view.total_pages()
    }

    pub fn total_rows(&self) -> usize {
        self.view.total_rows()
    }

    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    /// Rows of the source whose text form of `column` contains `needle`
    pub fn search(&mut self, column: &str, needle: &str, case_sensitive: bool) -> Result<&ResultSet> {
        let schema = self.source.schema();
        let name = schema.field(resolve_column(schema, column)?).name().clone();
        let predicate = Expr::Like {
            expr: Box::new(Expr::Cast {
                expr: Box::new(Expr::column(name)),
                data_type: DataType::Utf8,
            }),
            pattern: Box::new(Expr::Literal(Value::Str(format!(
                "%{}%",
                escape_like(needle)
            )))),
            negated: false,
            case_insensitive: !case_sensitive,
        };
        let text = format!("SELECT * FROM {} WHERE {}", self.source.name(), predicate);
        debug!(sql = %text, "Searching");
        let plan = LogicalPlan::Filter {
            predicate,
            input: Box::new(LogicalPlan::Scan {
                table: self.source.name().to_string(),
                schema: schema.clone(),
            }),
        };

        self.cancel_running();
        let result = execute_plan(
            &self.source,
            &plan,
            &self.config,
            CancelToken::new(),
            Instant::now(),
        )?;
        self.install(text, result);
        Ok(&self.view)
    }

    pub fn describe(&self, column: &str) -> Result<ColumnStats> {
        stats::describe(self.view.table(), column)
    }

    pub fn describe_all(&self) -> Result<Vec<ColumnStats>> {
        stats::describe_all(self.view.table())
    }

    /// Value counts in the view, compared with the source
    pub fn value_counts(&self, column: &str) -> Result<ValueCounts> {
        stats::value_counts(
            self.view.table(),
            column,
            &self.source,
            self.config.value_counts_limit,
        )
    }

    pub fn unique_values(&self, column: &str) -> Result<ArrayRef> {
        stats::unique_values(self.view.table(), column)
    }

    fn install(&mut self, sql: String, result: ResultSet) {
        debug!(rows = result.total_rows(), pages = result.total_pages(), "View replaced");
        self.view = result;
        self.last_query = Some(sql);
    }

    fn cancel_running(&mut self) {
        if let Some(handle) = self.running.take() {
            handle.cancel();
            if let Err(e) = handle.join() {
                match e {
                    Error::Cancelled => debug!("Previous query cancelled"),
                    other => warn!(error = %other, "Previous query failed"),
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.running.take() {
            handle.cancel();
        }
    }
}

/// Escape LIKE wildcards and the escape character so they match literally
fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("people.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    fn session(body: &str) -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, body);
        let config = EngineConfig {
            page_size: 2,
            ..EngineConfig::default()
        };
        let session = Session::open(&path, config).unwrap();
        (dir, session)
    }

    const PEOPLE: &str = "name,age\nAnn,31\nbob,25\nO'Neil,40\nann_b,19\nCarl,52\n";

    #[test]
    fn test_initial_view_is_source() {
        let (_dir, session) = session(PEOPLE);
        assert_eq!(session.total_rows(), 5);
        assert_eq!(session.total_pages(), 3);
        assert_eq!(session.page(3).unwrap().num_rows(), 1);
        assert!(session.last_query().is_none());
    }

    #[test]
    fn test_execute_replaces_view() {
        let (_dir, mut session) = session(PEOPLE);
        session.execute("SELECT name FROM data WHERE age > 30").unwrap();
        assert_eq!(session.total_rows(), 3);
        assert_eq!(session.last_query(), Some("SELECT name FROM data WHERE age > 30"));

        // Blank SQL keeps the current view
        session.execute("  ").unwrap();
        assert_eq!(session.total_rows(), 3);

        session.reset();
        assert_eq!(session.total_rows(), 5);
    }

    #[test]
    fn test_failed_query_keeps_view() {
        let (_dir, mut session) = session(PEOPLE);
        assert!(session.execute("SELECT nope FROM data").is_err());
        assert_eq!(session.total_rows(), 5);
    }

    #[test]
    fn test_search_escapes_quotes_and_wildcards() {
        let (_dir, mut session) = session(PEOPLE);
        session.search("name", "o'n", false).unwrap();
        assert_eq!(session.total_rows(), 1);
        assert_eq!(
            session.last_query(),
            Some("SELECT * FROM data WHERE CAST(name AS Utf8) ILIKE '%o''n%'")
        );

        session.search("name", "_", true).unwrap();
        assert_eq!(session.total_rows(), 1);

        session.search("name", "ann", true).unwrap();
        assert_eq!(session.total_rows(), 1);
        session.search("name", "ann", false).unwrap();
        assert_eq!(session.total_rows(), 2);
    }

    #[test]
    fn test_search_numeric_column() {
        let (_dir, mut session) = session(PEOPLE);
        session.search("AGE", "2", true).unwrap();
        assert_eq!(session.total_rows(), 2);
    }

    #[test]
    fn test_search_backslash_is_literal() {
        let (_dir, mut session) = session("path\nC:\\temp\nC:temp\n");
        let view = session.search("path", "C:\\temp", true).unwrap();
        let batch = view.to_batch().unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(
            batch.column(0).as_any().downcast_ref::<arrow::array::StringArray>().unwrap().value(0),
            "C:\\temp"
        );
    }

    #[test]
    fn test_submit_replaces_running_query() {
        let mut body = String::from("n\n");
        for i in 0..200_000 {
            body.push_str(&format!("{}\n", i));
        }
        let (_dir, mut session) = session(&body);
        session
            .submit("SELECT n % 13 AS k, SUM(n) AS s FROM data GROUP BY n % 13 ORDER BY k")
            .unwrap();
        session.submit("SELECT n FROM data WHERE n < 3").unwrap();

        let view = session.wait().unwrap();
        assert_eq!(view.total_rows(), 3);
        assert_eq!(view.column_names(), vec!["n"]);
        assert_eq!(session.last_query(), Some("SELECT n FROM data WHERE n < 3"));
        assert!(matches!(session.wait(), Err(Error::NoRunningQuery)));
    }

    #[test]
    fn test_background_query() {
        let (_dir, mut session) = session(PEOPLE);
        session.submit("SELECT COUNT(*) AS n FROM data").unwrap();
        let view = session.wait().unwrap();
        assert_eq!(view.total_rows(), 1);
        assert_eq!(view.column_names(), vec!["n"]);
        assert!(!session.is_running());
        assert!(matches!(session.wait(), Err(Error::NoRunningQuery)));
        assert!(matches!(session.cancel(), Err(Error::NoRunningQuery)));
    }

    #[test]
    fn test_poll_installs_finished_query() {
        let (_dir, mut session) = session(PEOPLE);
        assert!(!session.poll().unwrap());

        session.submit("SELECT name FROM data WHERE age > 50").unwrap();
        while !session.poll().unwrap() {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(session.total_rows(), 1);
        assert_eq!(session.last_query(), Some("SELECT name FROM data WHERE age > 50"));
    }

    #[test]
    fn test_stats_on_view() {
        let (_dir, mut session) = session(PEOPLE);
        session.execute("SELECT * FROM data WHERE age < 40").unwrap();
        let stats = session.describe("age").unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min.as_deref(), Some("19"));

        let counts = session.value_counts("name").unwrap();
        assert_eq!(counts.view_total, 3);
        assert_eq!(counts.source_total, Some(5));
        assert_eq!(counts.entries.len(), 5);

        assert_eq!(session.unique_values("name").unwrap().len(), 3);
        assert_eq!(session.describe_all().unwrap().len(), 2);
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, PEOPLE);
        let mut session = Session::open(&path, EngineConfig::default()).unwrap();
        write_csv(&dir, "name,age\nZoe,7\n");
        session.reload().unwrap();
        assert_eq!(session.total_rows(), 1);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("C:\\temp"), "C:\\\\temp");
    }
}
