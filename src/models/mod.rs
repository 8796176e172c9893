//! Data models shared by data sources and their callers.

pub mod connection;
pub mod query;

pub use connection::DataSourceStatus;
pub use query::{JsonRow, ResultMatrix, SqlStatement, Statement};
