//! Data source status models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time diagnostics for one data source.
///
/// Each counter is read independently, so a snapshot taken while units of
/// work are starting or finishing may be torn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceStatus {
    pub name: String,
    /// Physical connections ever admitted to the pool
    pub initialized: u64,
    /// Handles currently checked out
    pub borrowed: u64,
    pub idle: u64,
    /// Detected server version. None until detection succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub max_size: u32,
    pub shared: bool,
    pub captured_at: DateTime<Utc>,
}

impl DataSourceStatus {
    /// Usage ratio in the "borrowed of initialized" form used by acquire errors.
    pub fn usage(&self) -> String {
        format!("{} of {}", self.borrowed, self.initialized)
    }
}
