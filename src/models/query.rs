//! Statement and result models.
//!
//! Statements come from SQL builders outside this crate; the only contract is
//! a rendered SQL text and whether it must run without a prepared statement.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A row of a result set, keyed by column name.
pub type JsonRow = serde_json::Map<String, JsonValue>;

/// Anything that renders to SQL text.
pub trait Statement {
    /// The SQL text to send to the server.
    fn to_sql(&self) -> String;

    /// Run through the text protocol instead of a prepared statement.
    ///
    /// Some statements (e.g. `CREATE PROCEDURE`, `LOCK TABLES`) cannot be prepared.
    fn without_prepare(&self) -> bool {
        false
    }
}

impl Statement for str {
    fn to_sql(&self) -> String {
        self.to_string()
    }
}

impl Statement for String {
    fn to_sql(&self) -> String {
        self.clone()
    }
}

/// Plain SQL text with an explicit prepare flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlStatement {
    pub sql: String,
    /// Default: false
    #[serde(default)]
    pub raw: bool,
}

impl SqlStatement {
    /// A statement executed as a prepared statement.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            raw: false,
        }
    }

    /// A statement executed through the text protocol.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            raw: true,
        }
    }
}

impl Statement for SqlStatement {
    fn to_sql(&self) -> String {
        self.sql.clone()
    }

    fn without_prepare(&self) -> bool {
        self.raw
    }
}

impl std::fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Result of executing one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<JsonRow>,
    pub affected_rows: u64,
    /// Zero when the statement generated no id
    pub last_insert_id: u64,
}

impl ResultMatrix {
    /// Build a result set from rows.
    pub fn with_rows(columns: Vec<String>, rows: Vec<JsonRow>) -> Self {
        Self {
            columns,
            rows,
            ..Self::default()
        }
    }

    /// Build the result of a write statement.
    pub fn with_affected(affected_rows: u64, last_insert_id: u64) -> Self {
        Self {
            affected_rows,
            last_insert_id,
            ..Self::default()
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&JsonRow> {
        self.rows.get(index)
    }

    /// Value of `column` in row `index`.
    pub fn value(&self, index: usize, column: &str) -> Option<&JsonValue> {
        self.row(index).and_then(|row| row.get(column))
    }

    /// Value of `column` in row `index` as a string. Numbers are rendered.
    pub fn string(&self, index: usize, column: &str) -> Option<String> {
        match self.value(index, column)? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Value of `column` in row `index` as an integer.
    pub fn i64(&self, index: usize, column: &str) -> Option<i64> {
        match self.value(index, column)? {
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// First column of the first row as a string, e.g. for `SELECT VERSION()`.
    pub fn first_string(&self) -> Option<String> {
        let column = self.columns.first()?;
        self.string(0, column)
    }
}
