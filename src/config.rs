//! Engine configuration
//!
//! Settings are stored as JSON. Every field has a default so a partial (or
//! missing) settings file still yields a usable configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::reader::LoadOptions;
use crate::stats::DEFAULT_VALUE_COUNTS_LIMIT;

/// Placeholder for the table name inside query templates
pub const TABLE_NAME_VAR: &str = "$(default_data_var_name)";

/// Placeholder for the default row limit inside query templates
pub const LIMIT_VAR: &str = "$(default_limit)";

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Name the loaded file is queried as (default: "data")
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Row limit substituted for `$(default_limit)` (default: 100)
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Query run right after a file is opened
    #[serde(default = "default_query")]
    pub default_query: String,

    /// Rows per result page (default: 500)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Rows per scan batch when reading files (default: 8192)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Records sampled for CSV/JSON schema inference (default: 1000)
    #[serde(default = "default_infer_rows")]
    pub infer_rows: usize,

    /// Maximum entries reported by value counts (default: 50)
    #[serde(default = "default_value_counts_limit")]
    pub value_counts_limit: usize,
}

fn default_table_name() -> String {
    "data".to_string()
}

fn default_limit() -> usize {
    100
}

fn default_query() -> String {
    format!("SELECT * FROM {} LIMIT {}", TABLE_NAME_VAR, LIMIT_VAR)
}

fn default_page_size() -> usize {
    500
}

fn default_batch_size() -> usize {
    8192
}

fn default_infer_rows() -> usize {
    1000
}

fn default_value_counts_limit() -> usize {
    DEFAULT_VALUE_COUNTS_LIMIT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            default_limit: default_limit(),
            default_query: default_query(),
            page_size: default_page_size(),
            batch_size: default_batch_size(),
            infer_rows: default_infer_rows(),
            value_counts_limit: default_value_counts_limit(),
        }
    }
}

impl EngineConfig {
    /// Read settings from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read settings, falling back to defaults when the file is missing or broken
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Falling back to default settings");
                Self::default()
            }
        }
    }

    /// Write settings as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be greater than zero".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than zero".into()));
        }
        if self.infer_rows == 0 {
            return Err(Error::Config("infer_rows must be greater than zero".into()));
        }
        if !is_identifier(&self.table_name) {
            return Err(Error::Config(format!(
                "table_name '{}' is not a valid identifier",
                self.table_name
            )));
        }
        Ok(())
    }

    /// Substitute settings placeholders inside a query
    pub fn render_vars(&self, query: &str) -> String {
        query
            .replace(TABLE_NAME_VAR, &self.table_name)
            .replace(LIMIT_VAR, &self.default_limit.to_string())
    }

    /// The default query with placeholders substituted
    pub fn rendered_default_query(&self) -> String {
        self.render_vars(&self.default_query)
    }

    /// File reading options derived from these settings
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            batch_size: self.batch_size,
            columns: None,
            infer_rows: self.infer_rows,
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
