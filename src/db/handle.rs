//! Connection handles.
//!
//! A handle owns one pooled connection between acquisition and release. The
//! data source builds a [`NamedConnection`] for every acquisition and passes
//! it through the caller's wrapper factory, so callers can define their own
//! handle types by composing a `NamedConnection` and implementing
//! [`ConnectionHandle`].

use crate::db::audit::SqlAuditLogger;
use crate::db::driver::SqlConnection;
use crate::error::{DbError, DbResult};
use crate::models::{ResultMatrix, Statement};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;

/// Turns the data source's handle into the caller's handle type.
pub type WrapperFactory<C, H> = Arc<dyn Fn(NamedConnection<C>) -> H + Send + Sync>;

/// A pooled connection tagged with the data source it belongs to.
pub struct NamedConnection<C> {
    data_source: Arc<str>,
    raw: C,
    version: Option<Arc<str>>,
    audit: Arc<dyn SqlAuditLogger>,
    in_transaction: bool,
}

impl<C> std::fmt::Debug for NamedConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedConnection")
            .field("data_source", &self.data_source)
            .field("version", &self.version)
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl<C: SqlConnection> NamedConnection<C> {
    pub fn new(data_source: Arc<str>, raw: C, audit: Arc<dyn SqlAuditLogger>) -> Self {
        Self {
            data_source,
            raw,
            version: None,
            audit,
            in_transaction: false,
        }
    }

    pub fn data_source_name(&self) -> &str {
        &self.data_source
    }

    pub fn raw(&mut self) -> &mut C {
        &mut self.raw
    }

    pub fn into_raw(self) -> C {
        self.raw
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Written by the data source right after acquisition.
    pub(crate) fn set_version(&mut self, version: Option<Arc<str>>) {
        self.version = version;
    }

    /// Whether a transaction may still be open on the connection. Such a
    /// connection is discarded on release instead of going back to the pool.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub(crate) fn set_in_transaction(&mut self, open: bool) {
        self.in_transaction = open;
    }

    /// Execute SQL text, reporting it to the audit logger.
    pub fn execute_sql(&mut self, sql: String, prepared: bool) -> BoxFuture<'_, DbResult<ResultMatrix>> {
        Box::pin(async move {
            self.audit.before_execute(&self.data_source, &sql, prepared);
            let start = Instant::now();
            let outcome = self.raw.execute_sql(&sql, prepared).await;
            self.audit
                .after_execute(&self.data_source, &sql, &outcome, start.elapsed());
            outcome.map_err(DbError::from)
        })
    }
}

/// Capability of anything holding a data source connection.
pub trait ConnectionHandle: Send + 'static {
    type Raw: SqlConnection;

    fn named(&self) -> &NamedConnection<Self::Raw>;

    fn named_mut(&mut self) -> &mut NamedConnection<Self::Raw>;

    fn into_named(self) -> NamedConnection<Self::Raw>;

    fn data_source_name(&self) -> &str {
        self.named().data_source_name()
    }

    /// Server version detected by the data source, if known yet.
    fn version(&self) -> Option<&str> {
        self.named().version()
    }

    fn raw_connection(&mut self) -> &mut Self::Raw {
        self.named_mut().raw()
    }

    /// Execute a rendered statement on this connection.
    fn execute<S: Statement + ?Sized>(&mut self, statement: &S) -> BoxFuture<'_, DbResult<ResultMatrix>> {
        let sql = statement.to_sql();
        let prepared = !statement.without_prepare();
        self.named_mut().execute_sql(sql, prepared)
    }

    fn version_starts_with(&self, prefix: &str) -> bool {
        self.version().is_some_and(|v| v.starts_with(prefix))
    }

    fn is_mysql_5_6(&self) -> bool {
        self.version_starts_with("5.6.")
    }

    fn is_mysql_5_7(&self) -> bool {
        self.version_starts_with("5.7.")
    }

    fn is_mysql_8_0(&self) -> bool {
        self.version_starts_with("8.0.")
    }

    fn is_mysql_8_4(&self) -> bool {
        self.version_starts_with("8.4.")
    }

    fn is_mariadb(&self) -> bool {
        self.version().is_some_and(|v| v.contains("MariaDB"))
    }
}

impl<C: SqlConnection> ConnectionHandle for NamedConnection<C> {
    type Raw = C;

    fn named(&self) -> &NamedConnection<C> {
        self
    }

    fn named_mut(&mut self) -> &mut NamedConnection<C> {
        self
    }

    fn into_named(self) -> NamedConnection<C> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::audit::NoopAuditLogger;
    use crate::db::driver::DriverError;

    struct NullConnection;

    impl SqlConnection for NullConnection {
        fn execute_sql<'c>(
            &'c mut self,
            sql: &'c str,
            prepared: bool,
        ) -> BoxFuture<'c, Result<ResultMatrix, DriverError>> {
            Box::pin(async move {
                if sql.is_empty() {
                    Err(DriverError::Other("empty statement".to_string()))
                } else {
                    Ok(ResultMatrix::with_affected(u64::from(prepared), 0))
                }
            })
        }

        fn begin(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
            Box::pin(async { Ok(()) })
        }

        fn commit(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
            Box::pin(async { Ok(()) })
        }

        fn rollback(&mut self) -> BoxFuture<'_, Result<(), DriverError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn handle(version: Option<&str>) -> NamedConnection<NullConnection> {
        let mut handle = NamedConnection::new(Arc::from("main"), NullConnection, Arc::new(NoopAuditLogger));
        handle.set_version(version.map(Arc::from));
        handle
    }

    #[test]
    fn test_version_gates() {
        let h = handle(Some("8.0.36-0ubuntu0.22.04.1"));
        assert!(h.is_mysql_8_0());
        assert!(!h.is_mysql_5_6());
        assert!(!h.is_mariadb());

        let h = handle(Some("5.6.51-log"));
        assert!(h.is_mysql_5_6());
        assert!(!h.is_mysql_5_7());

        let h = handle(Some("10.11.6-MariaDB"));
        assert!(h.is_mariadb());
        assert!(!h.is_mysql_8_4());
    }

    #[test]
    fn test_unknown_version_is_not_an_error() {
        let h = handle(None);
        assert_eq!(h.version(), None);
        assert!(!h.is_mysql_8_0());
        assert!(!h.version_starts_with(""));
        assert_eq!(h.data_source_name(), "main");
        assert!(!h.in_transaction());
    }

    #[tokio::test]
    async fn test_execute_honours_prepare_flag() {
        use crate::models::SqlStatement;

        let mut h = handle(None);
        let prepared = h.execute("UPDATE t SET a = 1").await.unwrap();
        assert_eq!(prepared.affected_rows, 1);
        let raw = h.execute(&SqlStatement::raw("LOCK TABLES t WRITE")).await.unwrap();
        assert_eq!(raw.affected_rows, 0);
        assert!(matches!(h.execute("").await, Err(DbError::Driver(_))));
    }
}
