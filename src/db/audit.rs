//! SQL audit logging.
//!
//! Every statement a handle executes is reported to the [`SqlAuditLogger`]
//! the data source was built with. The default reports nothing.

use crate::config::duration_millis;
use crate::db::driver::DriverError;
use crate::models::ResultMatrix;
use std::time::Duration;
use tracing::{Level, debug, info, trace, warn};

/// Receives statement executions for auditing.
pub trait SqlAuditLogger: Send + Sync + std::fmt::Debug {
    fn before_execute(&self, _data_source: &str, _sql: &str, _prepared: bool) {}

    fn after_execute(
        &self,
        _data_source: &str,
        _sql: &str,
        _outcome: &Result<ResultMatrix, DriverError>,
        _elapsed: Duration,
    ) {
    }
}

/// Discards all audit events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

impl SqlAuditLogger for NoopAuditLogger {}

/// Reports executions as `tracing` events.
#[derive(Debug, Clone)]
pub struct TracingAuditLogger {
    level: Level,
    slow_threshold: Option<Duration>,
}

impl TracingAuditLogger {
    /// Report at `level`. Only TRACE, DEBUG and INFO are honoured; higher levels report at INFO.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            slow_threshold: None,
        }
    }

    /// Statements slower than `threshold` are reported at WARN.
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = Some(threshold);
        self
    }

    fn is_slow(&self, elapsed: Duration) -> bool {
        self.slow_threshold.is_some_and(|t| elapsed >= t)
    }
}

impl Default for TracingAuditLogger {
    fn default() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl SqlAuditLogger for TracingAuditLogger {
    fn before_execute(&self, data_source: &str, sql: &str, prepared: bool) {
        trace!(data_source = %data_source, sql = %sql, prepared, "Executing statement");
    }

    fn after_execute(
        &self,
        data_source: &str,
        sql: &str,
        outcome: &Result<ResultMatrix, DriverError>,
        elapsed: Duration,
    ) {
        let elapsed_ms = duration_millis(elapsed);
        let result = match outcome {
            Ok(matrix) => matrix,
            Err(e) => {
                warn!(data_source = %data_source, sql = %sql, elapsed_ms, error = %e, "Statement failed");
                return;
            }
        };

        if self.is_slow(elapsed) {
            warn!(
                data_source = %data_source,
                sql = %sql,
                elapsed_ms,
                rows = result.row_count(),
                "Slow statement"
            );
            return;
        }

        if self.level == Level::TRACE {
            trace!(
                data_source = %data_source,
                sql = %sql,
                elapsed_ms,
                rows = result.row_count(),
                affected_rows = result.affected_rows,
                "Statement executed"
            );
        } else if self.level == Level::DEBUG {
            debug!(
                data_source = %data_source,
                sql = %sql,
                elapsed_ms,
                rows = result.row_count(),
                affected_rows = result.affected_rows,
                "Statement executed"
            );
        } else {
            info!(
                data_source = %data_source,
                sql = %sql,
                elapsed_ms,
                rows = result.row_count(),
                affected_rows = result.affected_rows,
                "Statement executed"
            );
        }
    }
}
