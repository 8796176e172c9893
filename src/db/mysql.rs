//! MySQL binding of the pooled-connection primitive, backed by sqlx.

use crate::config::{ConnectOptions, DataSourceConfig};
use crate::db::driver::{ConnectHook, ConnectionPool, DriverError, PoolProvider, SqlConnection};
use crate::db::types::RowToJson;
use crate::models::ResultMatrix;
use futures_util::TryStreamExt;
use futures_util::future::BoxFuture;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Either, Executor, MySql, MySqlPool};
use std::sync::Arc;
use tracing::debug;

/// ER_LOCK_DEADLOCK: the server rolled back the whole transaction.
const ER_LOCK_DEADLOCK: u16 = 1213;
/// ER_XA_RBROLLBACK: the transaction branch was rolled back.
const ER_XA_RBROLLBACK: u16 = 1402;

impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        let rolled_back = err
            .as_database_error()
            .and_then(|db_err| db_err.try_downcast_ref::<MySqlDatabaseError>())
            .is_some_and(|e| matches!(e.number(), ER_LOCK_DEADLOCK | ER_XA_RBROLLBACK));
        if rolled_back {
            return DriverError::TransactionRolledBack(err.to_string());
        }

        match err {
            sqlx::Error::PoolClosed => DriverError::PoolClosed,
            other => DriverError::Sqlx(other),
        }
    }
}

/// Build sqlx connect options from connect parameters.
pub fn connect_options(connect: &ConnectOptions) -> MySqlConnectOptions {
    let mut options = MySqlConnectOptions::new()
        .host(&connect.host)
        .port(connect.port)
        .charset(&connect.charset);
    if let Some(user) = &connect.user {
        options = options.username(user);
    }
    if let Some(password) = &connect.password {
        options = options.password(password);
    }
    if let Some(schema) = &connect.schema {
        options = options.database(schema);
    }
    options
}

impl SqlConnection for MySqlConnection {
    fn execute_sql<'c>(
        &'c mut self,
        sql: &'c str,
        prepared: bool,
    ) -> BoxFuture<'c, Result<ResultMatrix, DriverError>> {
        Box::pin(async move {
            // Text protocol when not prepared: some statements (CREATE PROCEDURE,
            // LOCK TABLES, ...) cannot be prepared
            let mut stream = if prepared {
                Executor::fetch_many(&mut *self, sqlx::query(sql))
            } else {
                Executor::fetch_many(&mut *self, sql)
            };

            let mut matrix = ResultMatrix::default();
            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(done) => {
                        matrix.affected_rows += done.rows_affected();
                        if done.last_insert_id() != 0 {
                            matrix.last_insert_id = done.last_insert_id();
                        }
                    }
                    Either::Right(row) => {
                        if matrix.columns.is_empty() {
                            matrix.columns = row.column_names();
                        }
                        matrix.rows.push(row.to_json_map());
                    }
                }
            }
            Ok(matrix)
        })
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
        Box::pin(async move {
            Executor::execute(&mut *self, "BEGIN").await?;
            Ok(())
        })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
        Box::pin(async move {
            Executor::execute(&mut *self, "COMMIT").await?;
            Ok(())
        })
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
        Box::pin(async move {
            Executor::execute(&mut *self, "ROLLBACK").await?;
            Ok(())
        })
    }
}

impl SqlConnection for PoolConnection<MySql> {
    fn execute_sql<'c>(
        &'c mut self,
        sql: &'c str,
        prepared: bool,
    ) -> BoxFuture<'c, Result<ResultMatrix, DriverError>> {
        SqlConnection::execute_sql(&mut **self, sql, prepared)
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
        SqlConnection::begin(&mut **self)
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
        SqlConnection::commit(&mut **self)
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
        SqlConnection::rollback(&mut **self)
    }
}

/// sqlx MySQL pool.
#[derive(Debug, Clone)]
pub struct MySqlDriverPool {
    pool: MySqlPool,
}

impl MySqlDriverPool {
    /// The underlying sqlx pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

impl ConnectionPool for MySqlDriverPool {
    type Physical = MySqlConnection;
    type Pooled = PoolConnection<MySql>;

    fn acquire(&self) -> BoxFuture<'_, Result<PoolConnection<MySql>, DriverError>> {
        Box::pin(async move { self.pool.acquire().await.map_err(DriverError::from) })
    }

    fn release(&self, connection: PoolConnection<MySql>) {
        // sqlx returns the connection to the pool on drop
        drop(connection);
    }

    fn discard(&self, connection: PoolConnection<MySql>) {
        // Detaching frees the pool slot; dropping the socket ends the session,
        // which makes the server roll back whatever was left open
        drop(connection.detach());
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.pool.close().await })
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// Builds lazily-connecting sqlx MySQL pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlPoolProvider;

impl PoolProvider for MySqlPoolProvider {
    type Pool = MySqlDriverPool;

    fn build(
        &self,
        config: &DataSourceConfig,
        on_connect: ConnectHook<MySqlConnection>,
    ) -> Result<MySqlDriverPool, DriverError> {
        debug!(
            data_source = %config.name,
            url = %config.masked_url(),
            max_size = config.pool.max_size_or_default(),
            "Building MySQL pool"
        );

        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool.max_size_or_default())
            .acquire_timeout(config.pool.acquire_timeout_or_default())
            .after_connect(move |conn, _meta| {
                let on_connect = Arc::clone(&on_connect);
                Box::pin(async move {
                    on_connect(conn).await;
                    Ok(())
                })
            })
            .connect_lazy_with(connect_options(&config.connect));

        Ok(MySqlDriverPool { pool })
    }
}
