//! Blocking adapter over [`DataSource`] for synchronous callers.
//!
//! Calls park the current thread on the runtime handle, so they must be made
//! from outside the async runtime: plain threads or `spawn_blocking` workers.

use crate::db::datasource::DataSource;
use crate::db::driver::{ConnectionPool, PooledOf};
use crate::db::handle::{ConnectionHandle, NamedConnection};
use crate::error::DbResult;
use crate::models::DataSourceStatus;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::runtime::Handle;

pub struct BlockingDataSource<P: ConnectionPool, H = NamedConnection<PooledOf<P>>> {
    inner: Arc<DataSource<P, H>>,
    runtime: Handle,
}

impl<P: ConnectionPool, H> Clone for BlockingDataSource<P, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            runtime: self.runtime.clone(),
        }
    }
}

impl<P, H> BlockingDataSource<P, H>
where
    P: ConnectionPool,
    H: ConnectionHandle<Raw = P::Pooled>,
{
    pub fn new(inner: Arc<DataSource<P, H>>, runtime: Handle) -> Self {
        Self { inner, runtime }
    }

    /// The asynchronous data source behind this adapter.
    pub fn inner(&self) -> &Arc<DataSource<P, H>> {
        &self.inner
    }

    pub fn with_connection<T, F>(&self, work: F) -> DbResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut H) -> BoxFuture<'c, DbResult<T>> + Send,
    {
        self.runtime.block_on(self.inner.with_connection(work))
    }

    pub fn with_transaction<T, F>(&self, work: F) -> DbResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut H) -> BoxFuture<'c, DbResult<T>> + Send,
    {
        self.runtime.block_on(self.inner.with_transaction(work))
    }

    pub fn status(&self) -> DataSourceStatus {
        self.inner.status()
    }

    pub fn close(&self) {
        self.runtime.block_on(self.inner.close());
    }
}
