//! Query collaborator interface.
//!
//! The interpreter issues `SELECT` statements through a [`QueryExecutor`].
//! Implementations own connection management and must refuse anything that
//! is not a read-only query (see [`ensure_read_only`]).

mod postgres;

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use postgres::{PostgresQueryExecutor, PostgresSettings};

/// Keywords that make a statement a mutation, matched as whole words.
pub const WRITE_KEYWORDS: [&str; 13] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
    "REPLACE", "RENAME", "CALL", "EXECUTE",
];

/// Maximum rows rendered by [`format_query_output`].
pub const DISPLAY_ROWS: usize = 10;

/// Errors raised by a query collaborator.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// Statement is not a read-only SELECT.
    #[error("Only read-only SELECT statements are allowed: {0}")]
    NotReadOnly(String),

    /// Could not obtain a connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The database rejected or failed the statement.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Statement exceeded its time budget.
    #[error("Query timed out after {0}s")]
    Timeout(u64),

    /// Collaborator is misconfigured.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl QueryError {
    /// Returns true for failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Connection(_) | QueryError::Timeout(_))
    }
}

/// Tabular result of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
}

impl QueryOutput {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
        }
    }

    /// Result with known columns and no rows.
    pub fn empty(columns: Vec<String>) -> Self {
        Self::new(columns, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in the first row.
    pub fn first_row_value(&self, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.first()?.get(idx)
    }
}

/// Capability to run read-only SQL.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute a SELECT statement.
    async fn execute_query(&self, sql: &str) -> Result<QueryOutput, QueryError>;

    /// Executor name for logging.
    fn name(&self) -> &'static str {
        "query"
    }
}

fn write_keyword_regex() -> &'static Regex {
    static WRITE: OnceLock<Regex> = OnceLock::new();
    WRITE.get_or_init(|| {
        let pattern = format!(r"\b({})\b", WRITE_KEYWORDS.join("|"));
        Regex::new(&pattern).expect("write keyword pattern is valid")
    })
}

/// Reject statements that are not plain SELECTs.
pub fn ensure_read_only(sql: &str) -> Result<(), QueryError> {
    let upper = sql.trim().to_uppercase();

    if !upper.starts_with("SELECT") {
        return Err(QueryError::NotReadOnly(
            "statement must start with SELECT".to_string(),
        ));
    }

    if let Some(m) = write_keyword_regex().find(&upper) {
        return Err(QueryError::NotReadOnly(format!(
            "statement contains forbidden keyword {}",
            m.as_str()
        )));
    }

    Ok(())
}

/// Render a result as a plain-text table of at most [`DISPLAY_ROWS`] rows.
pub fn format_query_output(output: &QueryOutput) -> String {
    if output.row_count == 0 {
        return "Query succeeded with no rows".to_string();
    }

    let header = output.columns.join(" | ");
    let mut lines = vec![
        format!("Query returned {} rows", output.row_count),
        String::new(),
        header.clone(),
        "-".repeat(header.chars().count()),
    ];

    for row in output.rows.iter().take(DISPLAY_ROWS) {
        let cells: Vec<String> = row.iter().map(display_cell).collect();
        lines.push(cells.join(" | "));
    }

    if output.row_count > DISPLAY_ROWS {
        lines.push(String::new());
        lines.push(format!("... {} more rows", output.row_count - DISPLAY_ROWS));
    }

    lines.join("\n")
}

fn display_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ensure_read_only() {
        assert!(ensure_read_only("SELECT status FROM orders WHERE user_id = 42").is_ok());
        assert!(ensure_read_only("  select * from t").is_ok());
        assert!(ensure_read_only("SELECT * FROM t WHERE status = 'DELETED'").is_ok());
        assert!(ensure_read_only("SELECT updated_at FROM t").is_ok());

        assert!(matches!(
            ensure_read_only("UPDATE t SET a = 1"),
            Err(QueryError::NotReadOnly(_))
        ));
        assert!(ensure_read_only("SELECT 1; DROP TABLE t").is_err());
        assert!(ensure_read_only("select * from t; delete from t").is_err());
        assert!(ensure_read_only("WITH x AS (SELECT 1) SELECT * FROM x").is_err());
    }

    #[test]
    fn test_first_row_value() {
        let output = QueryOutput::new(
            vec!["id".to_string(), "status".to_string()],
            vec![vec![json!(1), json!("open")], vec![json!(2), json!("closed")]],
        );
        assert_eq!(output.row_count, 2);
        assert_eq!(output.first_row_value("status"), Some(&json!("open")));
        assert_eq!(output.first_row_value("missing"), None);
        assert_eq!(QueryOutput::empty(vec!["id".to_string()]).first_row_value("id"), None);
    }

    #[test]
    fn test_format_query_output() {
        let empty = QueryOutput::empty(vec!["id".to_string()]);
        assert_eq!(format_query_output(&empty), "Query succeeded with no rows");

        let rows: Vec<Vec<Value>> = (0..12).map(|i| vec![json!(i), Value::Null]).collect();
        let output = QueryOutput::new(vec!["id".to_string(), "note".to_string()], rows);
        let text = format_query_output(&output);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Query returned 12 rows");
        assert_eq!(lines[2], "id | note");
        assert_eq!(lines[3], "---------");
        assert_eq!(lines[4], "0 | NULL");
        assert_eq!(lines.last(), Some(&"... 2 more rows"));
        assert_eq!(lines.len(), 4 + DISPLAY_ROWS + 2);
    }

    #[test]
    fn test_retryable() {
        assert!(QueryError::Connection("refused".to_string()).is_retryable());
        assert!(QueryError::Timeout(30).is_retryable());
        assert!(!QueryError::NotReadOnly("x".to_string()).is_retryable());
        assert!(!QueryError::Execution("syntax".to_string()).is_retryable());
    }
}
