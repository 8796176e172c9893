//! Transaction protocol for one unit of work on one handle.

use crate::db::driver::SqlConnection;
use crate::db::handle::ConnectionHandle;
use crate::error::{DbError, DbResult};
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

/// Runs a unit of work between BEGIN and COMMIT/ROLLBACK on a borrowed handle.
///
/// The session never releases the handle; its owner does. The handle stays
/// marked as in a transaction from just before BEGIN until a commit or
/// rollback is known to have closed it, so a session that is dropped or
/// panics midway leaves the mark set.
pub struct TransactionSession<'a, H> {
    data_source: &'a str,
    handle: &'a mut H,
}

impl<'a, H: ConnectionHandle> TransactionSession<'a, H> {
    pub fn new(data_source: &'a str, handle: &'a mut H) -> Self {
        Self {
            data_source,
            handle,
        }
    }

    /// Begin, run `work`, then commit or roll back.
    pub async fn run<T, F>(self, work: F) -> DbResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut H) -> BoxFuture<'c, DbResult<T>> + Send,
    {
        let data_source = self.data_source;
        let handle = self.handle;

        handle.named_mut().set_in_transaction(true);
        handle
            .raw_connection()
            .begin()
            .await
            .map_err(|source| DbError::Begin {
                data_source: data_source.to_string(),
                source,
            })?;
        debug!(data_source = %data_source, "Transaction started");

        let outcome = work(&mut *handle).await;

        match outcome {
            Ok(value) => {
                handle
                    .raw_connection()
                    .commit()
                    .await
                    .map_err(|source| DbError::Commit {
                        data_source: data_source.to_string(),
                        source,
                    })?;
                handle.named_mut().set_in_transaction(false);
                debug!(data_source = %data_source, "Transaction committed");
                Ok(value)
            }
            Err(err) if err.root_cause().is_transaction_rolled_back() => {
                handle.named_mut().set_in_transaction(false);
                warn!(data_source = %data_source, error = %err, "Transaction rolled back by the server");
                Err(DbError::RollbackDoneManually {
                    data_source: data_source.to_string(),
                    source: Box::new(err),
                })
            }
            Err(err) => {
                match handle.raw_connection().rollback().await {
                    Ok(()) => {
                        handle.named_mut().set_in_transaction(false);
                        debug!(data_source = %data_source, error = %err, "Transaction rolled back");
                    }
                    Err(rollback_err) => {
                        warn!(
                            data_source = %data_source,
                            error = %err,
                            rollback_error = %rollback_err,
                            "Rollback failed"
                        );
                    }
                }
                Err(DbError::RollbackFinished {
                    data_source: data_source.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }
}
