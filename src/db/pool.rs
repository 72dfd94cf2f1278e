//! The connection pool guarding access to the embedded SQLite datastore.

use std::{
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::Duration,
};

use diesel::{
    connection::SimpleConnection,
    r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection},
    sqlite::SqliteConnection,
};
use tracing::warn;

use crate::Error;

/// SQLite pragmas applied to every connection handed out by the pool, per
/// spec §4.1: foreign keys on, WAL journaling, normal synchronous, a 10k-page
/// cache, memory temp store, and ~256 MiB of memory-mapped I/O.
const CONNECTION_PRAGMAS: &str = "
    PRAGMA foreign_keys = ON;
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA cache_size = -10000;
    PRAGMA temp_store = MEMORY;
    PRAGMA mmap_size = 268435456;
";

#[derive(Debug)]
struct PragmaCustomizer;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(CONNECTION_PRAGMAS)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Counters tracked by the pool, exposed via [`ConnectionPool::stats`].
#[derive(Debug, Default)]
pub struct PoolStats {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub exhaustion_events: u64,
    pub dead_connection_replacements: u64,
}

#[derive(Default)]
struct Counters {
    total_requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    exhaustion_events: AtomicU64,
    dead_connection_replacements: AtomicU64,
}

/// A borrowed connection. Guaranteed to release back to the pool (or simply
/// be dropped, if it was an overflow connection) on every exit path,
/// including panics unwinding through it.
pub enum Conn {
    Pooled(PooledConnection<ConnectionManager<SqliteConnection>>),
    Overflow(SqliteConnection),
}

impl std::ops::Deref for Conn {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        match self {
            Conn::Pooled(c) => c,
            Conn::Overflow(c) => c,
        }
    }
}

impl std::ops::DerefMut for Conn {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        match self {
            Conn::Pooled(c) => c,
            Conn::Overflow(c) => c,
        }
    }
}

/// A fixed-size pool of `N` prepared connections to the embedded datastore.
///
/// When every pooled connection is checked out, [`ConnectionPool::get`] does
/// not block indefinitely: it opens a transient overflow connection instead,
/// so callers always make forward progress within the configured timeout.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool<ConnectionManager<SqliteConnection>>,
    database_url: String,
    timeout: Duration,
    counters: Arc<Counters>,
}

impl ConnectionPool {
    /// Opens (creating if necessary) the datastore file at `path` and builds
    /// a pool of `size` prepared connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be built, e.g. the data directory
    /// does not exist or is not writable.
    pub fn new(path: &Path, size: u32, timeout: Duration) -> Result<Self, Error> {
        let database_url = path.to_string_lossy().into_owned();
        let manager = ConnectionManager::<SqliteConnection>::new(&database_url);
        let pool = Pool::builder()
            .max_size(size)
            .connection_timeout(timeout)
            .test_on_check_out(true)
            .connection_customizer(Box::new(PragmaCustomizer))
            .build(manager)
            .map_err(Error::Pool)?;

        Ok(Self {
            pool,
            database_url,
            timeout,
            counters: Arc::new(Counters::default()),
        })
    }

    /// Acquires a connection, creating a transient overflow connection
    /// rather than blocking indefinitely if the pool is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if both the pool and the overflow connection attempt
    /// fail within the configured timeout.
    pub fn get(&self) -> Result<Conn, Error> {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        match self.pool.get() {
            Ok(conn) => {
                self.counters.successes.fetch_add(1, Ordering::Relaxed);
                Ok(Conn::Pooled(conn))
            }
            Err(pool_err) => {
                self.counters
                    .exhaustion_events
                    .fetch_add(1, Ordering::Relaxed);
                warn!("connection pool exhausted, opening overflow connection: {pool_err}");
                match self.open_overflow() {
                    Ok(conn) => {
                        self.counters.successes.fetch_add(1, Ordering::Relaxed);
                        Ok(conn)
                    }
                    Err(e) => {
                        self.counters.failures.fetch_add(1, Ordering::Relaxed);
                        Err(e)
                    }
                }
            }
        }
    }

    fn open_overflow(&self) -> Result<Conn, Error> {
        use diesel::Connection;

        let mut conn = SqliteConnection::establish(&self.database_url)
            .map_err(Error::Connection)?;
        conn.batch_execute(CONNECTION_PRAGMAS)
            .map_err(Error::Query)?;
        Ok(Conn::Overflow(conn))
    }

    /// Records a dead-connection replacement, called by callers that detect
    /// a borrowed connection failed a liveness round-trip.
    pub fn record_dead_connection(&self) {
        self.counters
            .dead_connection_replacements
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            exhaustion_events: self.counters.exhaustion_events.load(Ordering::Relaxed),
            dead_connection_replacements: self
                .counters
                .dead_connection_replacements
                .load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub(crate) fn database_url(&self) -> &str {
        &self.database_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_opens_and_reports_stats() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db");
        let pool = ConnectionPool::new(&db_path, 5, Duration::from_secs(5)).unwrap();
        let _conn = pool.get().unwrap();
        let stats = pool.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.successes, 1);
    }

    #[test]
    fn pool_overflows_rather_than_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db");
        let pool = ConnectionPool::new(&db_path, 1, Duration::from_millis(50)).unwrap();
        let _held = pool.get().unwrap();
        // The single pooled connection is held above; this must still
        // succeed via the overflow path instead of timing out.
        let _overflow = pool.get().unwrap();
        assert_eq!(pool.stats().exhaustion_events, 1);
    }
}
