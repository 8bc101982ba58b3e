//! Backing store abstraction
//!
//! The build engine reads normalized source tables and writes analytics
//! tables through the [`AnalyticsStore`] trait. The only implementation is
//! the embedded DuckDB backend; the source tables, the resource structure
//! tables and the produced analytics tables all live in the same database.
//!
//! All operations are blocking. Populating a partition is one transactional
//! unit of work, so parallelism comes from running several of them on
//! separate connections rather than from suspending inside one.

use serde::{Deserialize, Serialize};

pub mod duckdb;
pub mod schema;
pub mod state;

pub use self::duckdb::DuckDbStore;
pub use schema::{
    CATEGORY_STRUCTURE, EngineSchema, ORG_UNIT_GROUP_SET_STRUCTURE, SCHEMA_VERSION, SourceSchema,
};
pub use state::{StateRepository, TableState};

/// Error type for database operations
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Transaction failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Query result row as a JSON value
pub type QueryRow = serde_json::Value;

/// Query result set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Rows of data
    pub rows: Vec<QueryRow>,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a new query result
    pub fn new(columns: Vec<String>, rows: Vec<QueryRow>) -> Self {
        Self {
            columns,
            rows,
            execution_time_ms: 0,
        }
    }

    /// Create an empty result
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of the first column as integers, skipping nulls
    pub fn first_column_i64(&self) -> Vec<i64> {
        let Some(column) = self.columns.first() else {
            return Vec::new();
        };

        self.rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter_map(value_as_i64)
            .collect()
    }

    /// Values of the first column as strings, skipping nulls
    pub fn first_column_strings(&self) -> Vec<String> {
        let Some(column) = self.columns.first() else {
            return Vec::new();
        };

        self.rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter_map(|value| match value {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
            .collect()
    }
}

/// Interpret a JSON query value as an integer
///
/// Wide integer and decimal types come back as strings.
pub fn value_as_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(|f| f as i64)),
        _ => None,
    }
}

/// Backing store for analytics table builds
///
/// Implementations must be safe to share between the worker threads that
/// populate partitions in parallel.
pub trait AnalyticsStore: Send + Sync {
    /// Execute a statement that doesn't return rows, returning affected rows
    fn execute(&self, sql: &str) -> DatabaseResult<usize>;

    /// Execute several `;`-separated statements
    fn execute_batch(&self, sql: &str) -> DatabaseResult<()>;

    /// Execute statements in order inside one transaction
    ///
    /// Either all statements take effect or none do. Returns the total
    /// number of affected rows.
    fn execute_in_transaction(&self, statements: &[String]) -> DatabaseResult<usize>;

    /// Execute a query and return its rows
    fn query(&self, sql: &str) -> DatabaseResult<QueryResult>;

    /// Get the database backend type name
    fn backend_type(&self) -> &'static str;

    /// Create the engine's own tables if they don't exist
    fn initialize(&self) -> DatabaseResult<()> {
        self.execute_batch(EngineSchema::create_tables_sql())
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        self.execute(&EngineSchema::record_version_sql())
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    /// Whether a query returns at least one row
    fn query_exists(&self, sql: &str) -> DatabaseResult<bool> {
        Ok(!self.query(sql)?.is_empty())
    }

    /// Values of the first result column as integers
    fn query_i64_column(&self, sql: &str) -> DatabaseResult<Vec<i64>> {
        Ok(self.query(sql)?.first_column_i64())
    }

    /// Names of base tables starting with `prefix`, sorted
    fn list_tables(&self, prefix: &str) -> DatabaseResult<Vec<String>> {
        let result = self.query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'main' AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )?;

        Ok(result
            .first_column_strings()
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    /// Whether a table or view with this exact name exists
    fn table_exists(&self, name: &str) -> DatabaseResult<bool> {
        self.query_exists(&format!(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'main' AND table_name = '{}'",
            crate::table::sql::escape_literal(name)
        ))
    }

    /// Column names of a table in ordinal order
    fn table_columns(&self, name: &str) -> DatabaseResult<Vec<String>> {
        let result = self.query(&format!(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = 'main' AND table_name = '{}' \
             ORDER BY ordinal_position",
            crate::table::sql::escape_literal(name)
        ))?;
        Ok(result.first_column_strings())
    }

    /// Count rows of a table
    fn count_rows(&self, table: &str) -> DatabaseResult<i64> {
        let result = self.query(&format!(
            "SELECT count(*) AS n FROM {}",
            crate::table::sql::quote(table)
        ))?;
        Ok(result.first_column_i64().first().copied().unwrap_or(0))
    }

    /// Check if database is healthy and accessible
    fn health_check(&self) -> DatabaseResult<bool> {
        let result = self.query("SELECT 1 AS healthy")?;
        Ok(!result.rows.is_empty())
    }
}

/// Output format for query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Format query results for display
pub fn format_query_result(result: &QueryResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(&result.rows).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => format_as_csv(result),
        OutputFormat::Table => format_as_table(result),
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn format_as_csv(result: &QueryResult) -> String {
    let mut output = String::new();

    output.push_str(&result.columns.join(","));
    output.push('\n');

    for row in &result.rows {
        let values: Vec<String> = result
            .columns
            .iter()
            .map(|col| {
                let value = row.get(col).unwrap_or(&serde_json::Value::Null);
                match value {
                    serde_json::Value::String(s) => {
                        if s.contains(',') || s.contains('"') || s.contains('\n') {
                            format!("\"{}\"", s.replace('"', "\"\""))
                        } else {
                            s.clone()
                        }
                    }
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                }
            })
            .collect();
        output.push_str(&values.join(","));
        output.push('\n');
    }

    output
}

fn format_as_table(result: &QueryResult) -> String {
    if result.is_empty() {
        return "(0 rows)".to_string();
    }

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.len()).collect();

    for row in &result.rows {
        for (i, col) in result.columns.iter().enumerate() {
            let value = row.get(col).unwrap_or(&serde_json::Value::Null);
            widths[i] = widths[i].max(display_value(value).len());
        }
    }

    let mut output = String::new();

    let header: Vec<String> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:width$}", c, width = widths[i]))
        .collect();
    output.push_str(&header.join(" | "));
    output.push('\n');

    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&separator.join("-+-"));
    output.push('\n');

    for row in &result.rows {
        let values: Vec<String> = result
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let value = row.get(col).unwrap_or(&serde_json::Value::Null);
                format!("{:width$}", display_value(value), width = widths[i])
            })
            .collect();
        output.push_str(&values.join(" | "));
        output.push('\n');
    }

    output.push_str(&format!("({} rows)", result.row_count()));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(
            OutputFormat::from_str("table").unwrap(),
            OutputFormat::Table
        );
        assert_eq!(OutputFormat::from_str("JSON").unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str("csv").unwrap(), OutputFormat::Csv);
        assert!(OutputFormat::from_str("xml").is_err());
    }

    #[test]
    fn test_first_column_helpers() {
        let result = QueryResult::new(
            vec!["year".to_string()],
            vec![
                serde_json::json!({"year": 2019}),
                serde_json::json!({"year": "2020"}),
                serde_json::json!({"year": null}),
            ],
        );
        assert_eq!(result.first_column_i64(), vec![2019, 2020]);
        assert_eq!(result.first_column_strings(), vec!["2019", "2020"]);
        assert!(QueryResult::empty().first_column_i64().is_empty());
    }

    #[test]
    fn test_format_as_table() {
        let result = QueryResult::new(
            vec!["partition".to_string(), "rows".to_string()],
            vec![
                serde_json::json!({"partition": "analytics_completeness_2020", "rows": 10}),
                serde_json::json!({"partition": "analytics_completeness_latest", "rows": null}),
            ],
        );

        let output = format_as_table(&result);
        assert!(output.contains("partition"));
        assert!(output.contains("analytics_completeness_2020"));
        assert!(output.contains("null"));
        assert!(output.contains("(2 rows)"));
    }

    #[test]
    fn test_format_as_csv() {
        let result = QueryResult::new(
            vec!["name".to_string(), "reason".to_string()],
            vec![
                serde_json::json!({"name": "a", "reason": "simple"}),
                serde_json::json!({"name": "b", "reason": "has, comma"}),
            ],
        );

        let output = format_as_csv(&result);
        assert!(output.contains("name,reason"));
        assert!(output.contains("a,simple"));
        assert!(output.contains("\"has, comma\""));
    }
}
