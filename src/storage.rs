//! `Storage` is the single writer-owner of the datastore (spec §5): every
//! other component holds a clone of it and goes through pool-mediated
//! transactions rather than touching the file directly.

use std::{path::PathBuf, time::Duration};

use crate::{
    db::{BackupManager, ConnectionPool, QueryStats},
    Error,
};

#[derive(Clone)]
pub struct Storage {
    pub(crate) pool: ConnectionPool,
    pub(crate) stats: std::sync::Arc<QueryStats>,
    pub(crate) backups: BackupManager,
}

impl Storage {
    /// Opens the datastore at `state_dir`, running pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be built or migrations fail.
    pub fn open(state_dir: &std::path::Path, pool_size: u32, query_timeout: Duration) -> Result<Self, Error> {
        std::fs::create_dir_all(state_dir).map_err(Error::Io)?;
        let db_path = state_dir.join("godpacks.db");
        let pool = ConnectionPool::new(&db_path, pool_size, query_timeout)?;
        let backups = BackupManager::new(state_dir.join("backups"), pool.clone(), &db_path)?;
        crate::db::migration::run_pending_migrations(&pool, &backups)?;

        Ok(Self {
            pool,
            stats: std::sync::Arc::new(QueryStats::new()),
            backups,
        })
    }

    /// Applies non-default backup retention settings. Intended to be
    /// chained immediately after [`Storage::open`].
    #[must_use]
    pub fn with_backup_retention(mut self, retention_days: i64, max_backup_count: usize) -> Self {
        self.backups = self.backups.with_retention(retention_days, max_backup_count);
        self
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    #[must_use]
    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    #[must_use]
    pub fn query_stats(&self) -> crate::db::QueryStatsSnapshot {
        self.stats.snapshot()
    }

    #[must_use]
    pub(crate) fn live_db_path(state_dir: &std::path::Path) -> PathBuf {
        state_dir.join("godpacks.db")
    }
}
