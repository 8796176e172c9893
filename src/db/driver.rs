//! Pooled-connection primitive.
//!
//! A data source never talks to the network itself. It drives a
//! [`ConnectionPool`] that hands out connections implementing
//! [`SqlConnection`], and is built by a [`PoolProvider`] that installs the
//! data source's connect hook on every physical connection the pool admits.
//! The MySQL binding lives in [`crate::db::mysql`].

use crate::config::DataSourceConfig;
use crate::models::ResultMatrix;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the underlying driver or pool.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The server already rolled the current transaction back.
    #[error("transaction was rolled back by the server: {0}")]
    TransactionRolledBack(String),

    #[error("connection pool is closed")]
    PoolClosed,

    #[error(transparent)]
    Sqlx(sqlx::Error),

    #[error("{0}")]
    Other(String),
}

/// Hook run on every physical connection the pool admits. It cannot fail.
pub type ConnectHook<C> = Arc<dyn for<'c> Fn(&'c mut C) -> BoxFuture<'c, ()> + Send + Sync>;

/// Caller-supplied per-connection setup, run before version detection.
pub type SetupHook<C> =
    Arc<dyn for<'c> Fn(&'c mut C) -> BoxFuture<'c, Result<(), DriverError>> + Send + Sync>;

/// One database connection.
pub trait SqlConnection: Send + 'static {
    /// Execute SQL text, as a prepared statement when `prepared` is set.
    fn execute_sql<'c>(
        &'c mut self,
        sql: &'c str,
        prepared: bool,
    ) -> BoxFuture<'c, Result<ResultMatrix, DriverError>>;

    fn begin(&mut self) -> BoxFuture<'_, Result<(), DriverError>>;

    fn commit(&mut self) -> BoxFuture<'_, Result<(), DriverError>>;

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), DriverError>>;
}

/// A pool of connections.
pub trait ConnectionPool: Send + Sync + 'static {
    /// Connection type seen by the connect hook while admitting it.
    type Physical: SqlConnection;
    /// Connection type handed out by `acquire`.
    type Pooled: SqlConnection;

    fn acquire(&self) -> BoxFuture<'_, Result<Self::Pooled, DriverError>>;

    /// Return a connection to the pool.
    fn release(&self, connection: Self::Pooled);

    /// Drop a connection whose session state is unknown, such as one abandoned
    /// inside a transaction. It must never be handed out again.
    fn discard(&self, connection: Self::Pooled);

    fn close(&self) -> BoxFuture<'_, ()>;

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}

/// Builds pools. Building must not wait for a connection.
pub trait PoolProvider {
    type Pool: ConnectionPool;

    fn build(
        &self,
        config: &DataSourceConfig,
        on_connect: ConnectHook<PhysicalOf<Self::Pool>>,
    ) -> Result<Self::Pool, DriverError>;
}

pub type PhysicalOf<P> = <P as ConnectionPool>::Physical;
pub type PooledOf<P> = <P as ConnectionPool>::Pooled;
