//! Readiness probe.
//!
//! Building a data source never touches the network. The probe turns "the pool
//! can hand out a connection" into a result bounded by a timeout: a timer and
//! a trivial unit of work race to complete one [`ReadinessSignal`], and the
//! first completion wins.

use crate::config::duration_millis;
use crate::db::datasource::DataSource;
use crate::db::driver::ConnectionPool;
use crate::db::handle::ConnectionHandle;
use crate::error::{DbError, DbResult};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// A result that can be completed at most once.
#[derive(Debug)]
pub struct ReadinessSignal {
    sender: Mutex<Option<oneshot::Sender<DbResult<()>>>>,
}

impl ReadinessSignal {
    /// Create a signal and the receiver that observes its completion.
    pub fn new() -> (Self, oneshot::Receiver<DbResult<()>>) {
        let (tx, rx) = oneshot::channel();
        let signal = Self {
            sender: Mutex::new(Some(tx)),
        };
        (signal, rx)
    }

    /// Complete the signal. Returns `false`, doing nothing, if it was already completed.
    pub fn complete(&self, result: DbResult<()>) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => {
                // The receiver may be gone already; completion still counts
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

/// Wait until `data_source` hands out a connection, failing with
/// [`DbError::NotReady`] once `timeout` elapses.
///
/// Failed attempts before the deadline are only logged; the pool keeps
/// retrying on its own schedule.
pub async fn probe<P, H>(data_source: Arc<DataSource<P, H>>, timeout: Duration) -> DbResult<()>
where
    P: ConnectionPool,
    H: ConnectionHandle<Raw = P::Pooled>,
{
    let (signal, completion) = ReadinessSignal::new();
    let signal = Arc::new(signal);
    let name = data_source.name().to_string();

    // The timer is never cancelled: firing after the trial won is a no-op
    let _timer = {
        let signal = Arc::clone(&signal);
        let name = name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let timed_out = signal.complete(Err(DbError::NotReady {
                data_source: name.clone(),
                timeout_ms: duration_millis(timeout),
            }));
            if !timed_out {
                debug!(data_source = %name, "Readiness timer fired after completion");
            }
        })
    };

    let trial = {
        let signal = Arc::clone(&signal);
        let data_source = Arc::clone(&data_source);
        tokio::spawn(async move {
            match data_source
                .with_connection(|_handle| Box::pin(async { Ok(()) }))
                .await
            {
                Ok(()) => {
                    signal.complete(Ok(()));
                }
                Err(e) => {
                    debug!(data_source = %data_source.name(), error = %e, "Readiness attempt failed");
                }
            }
        })
    };

    let result = completion
        .await
        .unwrap_or_else(|_| Err(DbError::failed(format!("[{name}] readiness signal dropped"))));

    match &result {
        Ok(()) => info!(data_source = %name, "Data source ready"),
        Err(e) => {
            trial.abort();
            warn!(data_source = %name, error = %e, "Data source not ready");
        }
    }
    result
}
