//! Named data sources.
//!
//! A [`DataSource`] pairs a name with a connection pool and runs units of work
//! against it. It owns the bookkeeping around the pool:
//!
//! - `initialized`: physical connections the pool ever admitted (never decremented)
//! - `borrowed`: handles currently checked out
//! - the server version, detected on admitted connections until one succeeds
//!
//! # Ordering
//!
//! For one unit of work the sequence is acquire, stamp version, count the
//! borrow, run the work, release, uncount the borrow. Release is done by a
//! guard, so it also happens when the work panics or the future is dropped.
//! A connection released while its transaction may still be open is
//! discarded instead of pooled; the server rolls the transaction back when
//! the session ends.
//! Counters are atomics read independently: a [`DataSourceStatus`] taken while
//! work is in flight may be torn.

use crate::config::DataSourceConfig;
use crate::db::audit::{NoopAuditLogger, SqlAuditLogger};
use crate::db::driver::{
    ConnectHook, ConnectionPool, DriverError, PhysicalOf, PoolProvider, PooledOf, SetupHook,
    SqlConnection,
};
use crate::db::handle::{ConnectionHandle, NamedConnection, WrapperFactory};
use crate::db::readiness;
use crate::db::transaction::TransactionSession;
use crate::error::{DbError, DbResult};
use crate::models::DataSourceStatus;
use futures_util::future::BoxFuture;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Query used to detect the server version.
pub const VERSION_QUERY: &str = "SELECT VERSION()";

/// State shared between the data source and the connect hook installed in its pool.
#[derive(Debug, Default)]
struct PoolCounters {
    initialized: AtomicU64,
    borrowed: AtomicU64,
    version: OnceLock<Arc<str>>,
    detection_claimed: AtomicBool,
}

impl PoolCounters {
    /// Claim version detection. At most one admission holds the claim at a time.
    fn claim_detection(&self) -> bool {
        self.detection_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give the claim back after a detection that produced no version, so the
    /// next admitted connection tries again.
    fn release_detection(&self) {
        self.detection_claimed.store(false, Ordering::Release);
    }

    fn version(&self) -> Option<Arc<str>> {
        self.version.get().cloned()
    }
}

/// Build the hook run on every physical connection the pool admits:
/// caller setup, then version detection while the version is unknown, then
/// counting.
/// Failures are logged and never reach the pool.
fn admission_hook<C: SqlConnection>(
    name: Arc<str>,
    counters: Arc<PoolCounters>,
    setup: Option<SetupHook<C>>,
) -> ConnectHook<C> {
    connect_hook(move |conn| {
        let name = Arc::clone(&name);
        let counters = Arc::clone(&counters);
        let setup = setup.clone();
        Box::pin(async move {
            if let Some(setup) = setup {
                if let Err(e) = setup(&mut *conn).await {
                    warn!(data_source = %name, error = %e, "Connection setup failed");
                }
            }

            if counters.version.get().is_none() && counters.claim_detection() {
                match conn.execute_sql(VERSION_QUERY, false).await {
                    Ok(result) => match result.first_string() {
                        Some(version) => {
                            debug!(data_source = %name, version = %version, "Detected server version");
                            let _ = counters.version.set(Arc::from(version));
                        }
                        None => {
                            warn!(data_source = %name, "Server version query returned no value");
                            counters.release_detection();
                        }
                    },
                    Err(e) => {
                        warn!(data_source = %name, error = %e, "Failed to detect server version");
                        counters.release_detection();
                    }
                }
            }

            let initialized = counters.initialized.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(data_source = %name, initialized, "Connection admitted to pool");
        })
    })
}

fn connect_hook<C, F>(hook: F) -> ConnectHook<C>
where
    F: for<'c> Fn(&'c mut C) -> BoxFuture<'c, ()> + Send + Sync + 'static,
{
    Arc::new(hook)
}

/// A named connection pool with transactional units of work.
pub struct DataSource<P: ConnectionPool, H = NamedConnection<PooledOf<P>>> {
    name: Arc<str>,
    config: DataSourceConfig,
    pool: P,
    counters: Arc<PoolCounters>,
    wrap: WrapperFactory<PooledOf<P>, H>,
    audit: Arc<dyn SqlAuditLogger>,
    _handle: PhantomData<fn() -> H>,
}

impl<P: ConnectionPool, H> std::fmt::Debug for DataSource<P, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("name", &self.name)
            .field("url", &self.config.masked_url())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

/// Builder for [`DataSource`].
pub struct DataSourceBuilder<Pr: PoolProvider, H> {
    config: DataSourceConfig,
    provider: Pr,
    setup: Option<SetupHook<PhysicalOf<Pr::Pool>>>,
    wrap: WrapperFactory<PooledOf<Pr::Pool>, H>,
    audit: Arc<dyn SqlAuditLogger>,
}

impl<Pr: PoolProvider> DataSourceBuilder<Pr, NamedConnection<PooledOf<Pr::Pool>>> {
    fn new(config: DataSourceConfig, provider: Pr) -> Self {
        Self {
            config,
            provider,
            setup: None,
            wrap: Arc::new(|named: NamedConnection<PooledOf<Pr::Pool>>| named),
            audit: Arc::new(NoopAuditLogger),
        }
    }
}

impl<Pr, H> DataSourceBuilder<Pr, H>
where
    Pr: PoolProvider,
    H: ConnectionHandle<Raw = PooledOf<Pr::Pool>>,
{
    /// Run `setup` on every new physical connection before it is pooled.
    /// Setup failures are logged and do not reject the connection.
    pub fn setup<F>(mut self, setup: F) -> Self
    where
        F: for<'c> Fn(&'c mut PhysicalOf<Pr::Pool>) -> BoxFuture<'c, Result<(), DriverError>>
            + Send
            + Sync
            + 'static,
    {
        self.setup = Some(Arc::new(setup));
        self
    }

    /// Report executed statements to `audit`.
    pub fn audit_logger(mut self, audit: Arc<dyn SqlAuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// Hand out a custom handle type built from each [`NamedConnection`].
    pub fn wrap_with<H2, F>(self, wrap: F) -> DataSourceBuilder<Pr, H2>
    where
        H2: ConnectionHandle<Raw = PooledOf<Pr::Pool>>,
        F: Fn(NamedConnection<PooledOf<Pr::Pool>>) -> H2 + Send + Sync + 'static,
    {
        DataSourceBuilder {
            config: self.config,
            provider: self.provider,
            setup: self.setup,
            wrap: Arc::new(wrap),
            audit: self.audit,
        }
    }

    /// Build the data source. No connection is made.
    pub fn build(self) -> DbResult<DataSource<Pr::Pool, H>> {
        self.config.validate()?;

        let name: Arc<str> = Arc::from(self.config.name.as_str());
        let counters = Arc::new(PoolCounters::default());
        let hook = admission_hook(Arc::clone(&name), Arc::clone(&counters), self.setup);
        let pool = self
            .provider
            .build(&self.config, hook)
            .map_err(|e| DbError::config(format!("[{name}] cannot build pool: {e}")))?;

        info!(
            data_source = %name,
            url = %self.config.masked_url(),
            max_size = self.config.pool.max_size_or_default(),
            shared = self.config.pool.shared,
            "Data source created"
        );

        Ok(DataSource {
            name,
            config: self.config,
            pool,
            counters,
            wrap: self.wrap,
            audit: self.audit,
            _handle: PhantomData,
        })
    }

    /// Build the data source and wait until it yields a connection, or fail
    /// once the pool acquire timeout elapses.
    pub async fn connect(self) -> DbResult<Arc<DataSource<Pr::Pool, H>>> {
        let timeout = self.config.pool.acquire_timeout_or_default();
        let data_source = Arc::new(self.build()?);
        readiness::probe(Arc::clone(&data_source), timeout).await?;
        Ok(data_source)
    }
}

impl<P: ConnectionPool> DataSource<P> {
    /// Start building a data source over pools made by `provider`.
    pub fn builder<Pr>(config: DataSourceConfig, provider: Pr) -> DataSourceBuilder<Pr, NamedConnection<P::Pooled>>
    where
        Pr: PoolProvider<Pool = P>,
    {
        DataSourceBuilder::new(config, provider)
    }
}

/// A checked-out handle. Dropping it releases the connection, or discards it
/// if a transaction may still be open on it.
struct Lease<'a, P: ConnectionPool, H: ConnectionHandle<Raw = P::Pooled>> {
    data_source: &'a DataSource<P, H>,
    handle: Option<H>,
}

impl<P: ConnectionPool, H: ConnectionHandle<Raw = P::Pooled>> Lease<'_, P, H> {
    fn handle_mut(&mut self) -> DbResult<&mut H> {
        self.handle.as_mut().ok_or_else(|| {
            DbError::failed(format!("[{}] connection already released", self.data_source.name))
        })
    }
}

impl<P: ConnectionPool, H: ConnectionHandle<Raw = P::Pooled>> Drop for Lease<'_, P, H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let named = handle.into_named();
            if named.in_transaction() {
                warn!(
                    data_source = %self.data_source.name,
                    "Discarding connection left inside a transaction"
                );
                self.data_source.pool.discard(named.into_raw());
            } else {
                self.data_source.pool.release(named.into_raw());
            }
            let borrowed = self.data_source.counters.borrowed.fetch_sub(1, Ordering::AcqRel) - 1;
            debug!(data_source = %self.data_source.name, borrowed, "Connection released");
        }
    }
}

impl<P, H> DataSource<P, H>
where
    P: ConnectionPool,
    H: ConnectionHandle<Raw = P::Pooled>,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    /// The underlying pool.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Run `work` with a connection handle. The handle is released whatever
    /// the outcome; a failure of `work` is wrapped as [`DbError::Work`].
    pub async fn with_connection<T, F>(&self, work: F) -> DbResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut H) -> BoxFuture<'c, DbResult<T>> + Send,
    {
        let mut lease = self.acquire().await?;
        let result = work(lease.handle_mut()?).await;
        drop(lease);
        result.map_err(|source| DbError::Work {
            data_source: self.name.to_string(),
            source: Box::new(source),
        })
    }

    /// Run `work` inside a transaction: commit on success, roll back on failure.
    ///
    /// - begin fails: [`DbError::Begin`], nothing else is attempted
    /// - commit fails: [`DbError::Commit`], no rollback is attempted
    /// - `work` fails with the driver's rolled-back signal:
    ///   [`DbError::RollbackDoneManually`], no rollback is issued
    /// - `work` fails otherwise: a rollback is issued and
    ///   [`DbError::RollbackFinished`] wraps the original failure, whether or
    ///   not the rollback itself succeeded
    pub async fn with_transaction<T, F>(&self, work: F) -> DbResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut H) -> BoxFuture<'c, DbResult<T>> + Send,
    {
        let mut lease = self.acquire().await?;
        let result = TransactionSession::new(&self.name, lease.handle_mut()?)
            .run(work)
            .await;
        drop(lease);
        result
    }

    async fn acquire(&self) -> DbResult<Lease<'_, P, H>> {
        let raw = self.pool.acquire().await.map_err(|source| {
            let error = DbError::Acquire {
                data_source: self.name.to_string(),
                borrowed: self.borrowed_count(),
                initialized: self.initialized_count(),
                source,
            };
            warn!(error = %error, "Connection acquisition failed");
            error
        })?;

        let named = NamedConnection::new(Arc::clone(&self.name), raw, Arc::clone(&self.audit));
        let mut handle = (self.wrap)(named);
        handle.named_mut().set_version(self.counters.version());
        let borrowed = self.counters.borrowed.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(data_source = %self.name, borrowed, "Connection acquired");

        Ok(Lease {
            data_source: self,
            handle: Some(handle),
        })
    }

    /// Close the pool.
    pub async fn close(&self) {
        info!(data_source = %self.name, "Closing data source");
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Physical connections ever admitted to the pool.
    pub fn initialized_count(&self) -> u64 {
        self.counters.initialized.load(Ordering::Acquire)
    }

    /// Handles currently checked out.
    pub fn borrowed_count(&self) -> u64 {
        self.counters.borrowed.load(Ordering::Acquire)
    }

    /// `initialized - borrowed`, read as two independent loads.
    pub fn idle_count(&self) -> u64 {
        let initialized = self.initialized_count();
        initialized.saturating_sub(self.borrowed_count())
    }

    /// Detected server version. `None` until a detection succeeds; every newly
    /// admitted connection retries while it is unknown.
    pub fn version(&self) -> Option<Arc<str>> {
        self.counters.version()
    }

    /// Diagnostics snapshot.
    pub fn status(&self) -> DataSourceStatus {
        let initialized = self.initialized_count();
        let borrowed = self.borrowed_count();
        DataSourceStatus {
            name: self.name.to_string(),
            initialized,
            borrowed,
            idle: initialized.saturating_sub(borrowed),
            version: self.version().map(|v| v.to_string()),
            max_size: self.config.pool.max_size_or_default(),
            shared: self.config.pool.shared,
            captured_at: chrono::Utc::now(),
        }
    }
}
