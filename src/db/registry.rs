//! Registry of shared data sources.
//!
//! Data sources configured with `pool.shared = true` are registered under
//! their name and handed out to every later request for that name. A
//! non-shared configuration always gets a private data source that is never
//! registered.

use crate::config::DataSourceConfig;
use crate::db::datasource::DataSource;
use crate::db::driver::{ConnectionPool, PooledOf};
use crate::db::handle::{ConnectionHandle, NamedConnection};
use crate::error::{DbError, DbResult};
use crate::models::DataSourceStatus;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub struct DataSourceRegistry<P: ConnectionPool, H = NamedConnection<PooledOf<P>>> {
    sources: Arc<RwLock<HashMap<String, Arc<DataSource<P, H>>>>>,
}

impl<P: ConnectionPool, H> Clone for DataSourceRegistry<P, H> {
    fn clone(&self) -> Self {
        Self {
            sources: Arc::clone(&self.sources),
        }
    }
}

impl<P: ConnectionPool, H> Default for DataSourceRegistry<P, H> {
    fn default() -> Self {
        Self {
            sources: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<P, H> DataSourceRegistry<P, H>
where
    P: ConnectionPool,
    H: ConnectionHandle<Raw = P::Pooled>,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already connected data source under its name.
    pub async fn register(&self, data_source: Arc<DataSource<P, H>>) -> DbResult<()> {
        let name = data_source.name().to_string();
        let mut sources = self.sources.write().await;
        if sources.contains_key(&name) {
            return Err(DbError::AlreadyRegistered { name });
        }
        info!(data_source = %name, "Registered data source");
        sources.insert(name, data_source);
        Ok(())
    }

    /// Return the shared data source registered for `config.name`, or create
    /// one with `connect`.
    ///
    /// Non-shared configurations bypass the registry. Asking for a shared data
    /// source under a name held by a non-shared registration fails with
    /// [`DbError::AlreadyRegistered`].
    pub async fn get_or_connect<F, Fut>(
        &self,
        config: DataSourceConfig,
        connect: F,
    ) -> DbResult<Arc<DataSource<P, H>>>
    where
        F: FnOnce(DataSourceConfig) -> Fut,
        Fut: Future<Output = DbResult<Arc<DataSource<P, H>>>>,
    {
        if !config.pool.shared {
            debug!(data_source = %config.name, "Creating private data source");
            return connect(config).await;
        }

        let name = config.name.clone();

        // Early check for an existing data source
        {
            let sources = self.sources.read().await;
            if let Some(existing) = sources.get(&name) {
                return Self::reuse(&name, existing);
            }
        }

        let created = connect(config).await?;

        // Re-check after async work to prevent TOCTOU race; a losing pool is
        // closed outside the lock
        let outcome = {
            let mut sources = self.sources.write().await;
            match sources.get(&name) {
                Some(existing) => Err(Self::reuse(&name, existing)),
                None => {
                    sources.insert(name.clone(), Arc::clone(&created));
                    Ok(())
                }
            }
        };

        match outcome {
            Ok(()) => {
                info!(data_source = %name, "Registered shared data source");
                Ok(created)
            }
            Err(existing) => {
                debug!(data_source = %name, "Concurrent registration detected, closing duplicate pool");
                created.close().await;
                existing
            }
        }
    }

    fn reuse(name: &str, existing: &Arc<DataSource<P, H>>) -> DbResult<Arc<DataSource<P, H>>> {
        if existing.config().pool.shared {
            debug!(data_source = %name, "Reusing shared data source");
            Ok(Arc::clone(existing))
        } else {
            Err(DbError::AlreadyRegistered {
                name: name.to_string(),
            })
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<DataSource<P, H>>> {
        let sources = self.sources.read().await;
        sources.get(name).cloned()
    }

    /// Status of every registered data source, ordered by name.
    pub async fn list(&self) -> Vec<DataSourceStatus> {
        let sources = self.sources.read().await;
        let mut statuses: Vec<DataSourceStatus> = sources.values().map(|ds| ds.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Unregister a data source without closing it.
    pub async fn remove(&self, name: &str) -> Option<Arc<DataSource<P, H>>> {
        let mut sources = self.sources.write().await;
        let removed = sources.remove(name);
        if removed.is_some() {
            info!(data_source = %name, "Unregistered data source");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sources.read().await.is_empty()
    }

    /// Close every registered data source and clear the registry.
    pub async fn close_all(&self) {
        let mut sources = self.sources.write().await;
        for (name, data_source) in sources.drain() {
            info!(data_source = %name, "Closing data source");
            data_source.close().await;
        }
        info!("All data sources closed");
    }
}
