//! Data source layer.
//!
//! - `driver`: traits over the pooled-connection primitive
//! - `mysql`: the sqlx MySQL binding of those traits
//! - `datasource`: named data sources with transactional units of work
//! - `registry`: shared data sources by name

pub mod audit;
pub mod blocking;
pub mod datasource;
pub mod driver;
pub mod handle;
pub mod mysql;
pub mod readiness;
pub mod registry;
pub mod transaction;
pub mod types;

pub use audit::{NoopAuditLogger, SqlAuditLogger, TracingAuditLogger};
pub use blocking::BlockingDataSource;
pub use datasource::{DataSource, DataSourceBuilder, VERSION_QUERY};
pub use driver::{ConnectHook, ConnectionPool, DriverError, PoolProvider, SetupHook, SqlConnection};
pub use handle::{ConnectionHandle, NamedConnection, WrapperFactory};
pub use mysql::{MySqlDriverPool, MySqlPoolProvider};
pub use readiness::{ReadinessSignal, probe};
pub use registry::DataSourceRegistry;
pub use transaction::TransactionSession;

/// Data source over the sqlx MySQL pool with plain named handles.
pub type MySqlDataSource = DataSource<MySqlDriverPool>;
