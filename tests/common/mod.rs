//! In-memory pool double shared by the integration tests.

#![allow(dead_code)]

use futures_util::future::BoxFuture;
use named_datasource::config::{DataSourceConfig, PoolOptions, TimeUnit, Timeout};
use named_datasource::db::{
    ConnectHook, ConnectionPool, DataSource, DriverError, NamedConnection, PoolProvider,
    SqlConnection, VERSION_QUERY,
};
use named_datasource::models::{JsonRow, ResultMatrix};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const MOCK_VERSION: &str = "8.0.36-mock";

/// How the mock pool answers `acquire` when it needs a new physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Connections are admitted immediately.
    Accept,
    /// Every connect attempt fails, like a wrong password.
    Refuse,
    /// Connect attempts never finish, like a black-holed host.
    Hang,
}

/// Knobs and call counters shared by a mock pool and the test that built it.
#[derive(Debug)]
pub struct MockState {
    pub connect_mode: Mutex<ConnectMode>,
    pub max_size: u64,
    pub server_version: Mutex<Option<String>>,
    pub fail_begin: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_rollback: AtomicBool,
    pub physical_created: AtomicU64,
    pub open: AtomicU64,
    pub version_queries: AtomicU64,
    pub begins: AtomicU64,
    pub commits: AtomicU64,
    pub rollbacks: AtomicU64,
    /// Connections dropped through `discard` instead of being pooled.
    pub discarded: AtomicU64,
    /// Connections returned to the idle set with a transaction still open.
    pub dirty_releases: AtomicU64,
    pub executed: Mutex<Vec<String>>,
}

impl MockState {
    pub fn new(max_size: u64) -> Arc<Self> {
        Arc::new(Self {
            connect_mode: Mutex::new(ConnectMode::Accept),
            max_size,
            server_version: Mutex::new(Some(MOCK_VERSION.to_string())),
            fail_begin: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            fail_rollback: AtomicBool::new(false),
            physical_created: AtomicU64::new(0),
            open: AtomicU64::new(0),
            version_queries: AtomicU64::new(0),
            begins: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            dirty_releases: AtomicU64::new(0),
            executed: Mutex::new(Vec::new()),
        })
    }

    pub fn set_connect_mode(&self, mode: ConnectMode) {
        *self.connect_mode.lock().unwrap() = mode;
    }

    pub fn set_server_version(&self, version: Option<&str>) {
        *self.server_version.lock().unwrap() = version.map(str::to_string);
    }

    pub fn count(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[derive(Debug)]
pub struct MockConnection {
    pub id: u64,
    /// Set by a successful BEGIN, cleared by COMMIT, ROLLBACK or a server-side rollback.
    pub in_transaction: bool,
    state: Arc<MockState>,
}

impl SqlConnection for MockConnection {
    /// `FAIL ...` fails, `DEADLOCK ...` fails with the rolled-back signal,
    /// `SELECT VERSION()` answers with the configured server version.
    fn execute_sql<'c>(
        &'c mut self,
        sql: &'c str,
        _prepared: bool,
    ) -> BoxFuture<'c, Result<ResultMatrix, DriverError>> {
        Box::pin(async move {
            self.state.executed.lock().unwrap().push(sql.to_string());

            if sql == VERSION_QUERY {
                self.state.version_queries.fetch_add(1, Ordering::SeqCst);
                // Give concurrent admissions a chance to race
                tokio::task::yield_now().await;
                let version = self.state.server_version.lock().unwrap().clone();
                return match version {
                    Some(v) => {
                        let mut row = JsonRow::new();
                        row.insert("VERSION()".to_string(), v.into());
                        Ok(ResultMatrix::with_rows(vec!["VERSION()".to_string()], vec![row]))
                    }
                    None => Err(DriverError::Other("SELECT command denied".to_string())),
                };
            }
            if sql.starts_with("FAIL") {
                return Err(DriverError::Other(format!("statement failed: {sql}")));
            }
            if sql.starts_with("DEADLOCK") {
                self.in_transaction = false;
                return Err(DriverError::TransactionRolledBack(
                    "Deadlock found when trying to get lock".to_string(),
                ));
            }
            Ok(ResultMatrix::with_affected(1, self.id))
        })
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
        Box::pin(async move {
            self.state.begins.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_begin.load(Ordering::SeqCst) {
                return Err(DriverError::Other("connection reset during BEGIN".to_string()));
            }
            self.in_transaction = true;
            Ok(())
        })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
        Box::pin(async move {
            self.state.commits.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_commit.load(Ordering::SeqCst) {
                return Err(DriverError::Other("lost connection during COMMIT".to_string()));
            }
            self.in_transaction = false;
            Ok(())
        })
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
        Box::pin(async move {
            self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_rollback.load(Ordering::SeqCst) {
                return Err(DriverError::Other("lost connection during ROLLBACK".to_string()));
            }
            self.in_transaction = false;
            Ok(())
        })
    }
}

pub struct MockPool {
    state: Arc<MockState>,
    on_connect: ConnectHook<MockConnection>,
    idle: Mutex<Vec<MockConnection>>,
    closed: AtomicBool,
}

impl MockPool {
    pub fn idle_len(&self) -> usize {
        self.idle.lock().unwrap().len()
    }
}

impl ConnectionPool for MockPool {
    type Physical = MockConnection;
    type Pooled = MockConnection;

    fn acquire(&self) -> BoxFuture<'_, Result<MockConnection, DriverError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(DriverError::PoolClosed);
            }
            let reused = self.idle.lock().unwrap().pop();
            if let Some(conn) = reused {
                return Ok(conn);
            }
            if self.state.open.load(Ordering::SeqCst) >= self.state.max_size {
                return Err(DriverError::Other("pool timed out while waiting for an open connection".to_string()));
            }

            let mode = *self.state.connect_mode.lock().unwrap();
            match mode {
                ConnectMode::Accept => {}
                ConnectMode::Refuse => {
                    return Err(DriverError::Other("Access denied for user 'app'".to_string()));
                }
                ConnectMode::Hang => std::future::pending::<()>().await,
            }

            self.state.open.fetch_add(1, Ordering::SeqCst);
            let id = self.state.physical_created.fetch_add(1, Ordering::SeqCst) + 1;
            let mut conn = MockConnection {
                id,
                in_transaction: false,
                state: Arc::clone(&self.state),
            };
            (self.on_connect)(&mut conn).await;
            Ok(conn)
        })
    }

    fn release(&self, connection: MockConnection) {
        if connection.in_transaction {
            self.state.dirty_releases.fetch_add(1, Ordering::SeqCst);
        }
        self.idle.lock().unwrap().push(connection);
    }

    fn discard(&self, connection: MockConnection) {
        self.state.discarded.fetch_add(1, Ordering::SeqCst);
        self.state.open.fetch_sub(1, Ordering::SeqCst);
        drop(connection);
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            let drained = self.idle.lock().unwrap().drain(..).count() as u64;
            self.state.open.fetch_sub(drained, Ordering::SeqCst);
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct MockProvider {
    pub state: Arc<MockState>,
}

impl MockProvider {
    pub fn new(max_size: u64) -> Self {
        Self {
            state: MockState::new(max_size),
        }
    }
}

impl PoolProvider for MockProvider {
    type Pool = MockPool;

    fn build(
        &self,
        _config: &DataSourceConfig,
        on_connect: ConnectHook<MockConnection>,
    ) -> Result<MockPool, DriverError> {
        Ok(MockPool {
            state: Arc::clone(&self.state),
            on_connect,
            idle: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }
}

pub type MockDataSource = DataSource<MockPool, NamedConnection<MockConnection>>;

/// Config for a data source named `name` with the given acquire timeout.
pub fn config(name: &str, timeout_ms: u64) -> DataSourceConfig {
    DataSourceConfig::new(name).with_pool(PoolOptions {
        max_size: Some(4),
        shared: true,
        acquire_timeout: Some(Timeout::new(timeout_ms, TimeUnit::Milliseconds)),
    })
}

/// A built, not yet probed, data source over a fresh mock pool.
pub fn data_source(name: &str, max_size: u64) -> (Arc<MockDataSource>, Arc<MockState>) {
    let provider = MockProvider::new(max_size);
    let state = Arc::clone(&provider.state);
    let ds = DataSource::builder(config(name, 1_000), provider)
        .build()
        .unwrap();
    (Arc::new(ds), state)
}
