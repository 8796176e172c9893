//! Named data sources.
//!
//! This library pairs a data source name with a pooled MySQL connection and
//! runs units of work against it, inside or outside a transaction, keeping
//! borrow accounting and the detected server version.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, DataSourceConfig};
pub use db::{ConnectionHandle, DataSource, DataSourceRegistry, NamedConnection};
pub use error::{DbError, DbResult};
