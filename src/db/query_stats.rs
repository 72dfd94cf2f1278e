//! Query timing and counters, guarded by a single mutex as spec §4.1
//! requires ("counters for total/failed/rollback counts are maintained
//! under a single mutex").

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use tracing::warn;

const SLOW_QUERY_THRESHOLD: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Clone, Copy)]
pub struct QueryStatsSnapshot {
    pub total: u64,
    pub failed: u64,
    pub rolled_back: u64,
    pub slow: u64,
}

#[derive(Debug, Default)]
struct Inner {
    total: u64,
    failed: u64,
    rolled_back: u64,
    slow: u64,
}

/// Statement-level timing and outcome counters for the storage engine.
#[derive(Debug, Default)]
pub struct QueryStats {
    inner: Mutex<Inner>,
}

impl QueryStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Times `body`, recording a slow-query event if it runs past
    /// [`SLOW_QUERY_THRESHOLD`], and bumps total/failed counters from the
    /// result.
    pub fn record<T, E>(&self, label: &str, body: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let start = Instant::now();
        let result = body();
        let elapsed = start.elapsed();

        let mut inner = self.inner.lock().expect("query stats mutex poisoned");
        inner.total += 1;
        if elapsed >= SLOW_QUERY_THRESHOLD {
            inner.slow += 1;
            drop(inner);
            warn!(query = label, ?elapsed, "slow query");
        } else {
            drop(inner);
        }
        if result.is_err() {
            self.inner.lock().expect("query stats mutex poisoned").failed += 1;
        }
        result
    }

    pub fn record_rollback(&self) {
        self.inner
            .lock()
            .expect("query stats mutex poisoned")
            .rolled_back += 1;
    }

    #[must_use]
    pub fn snapshot(&self) -> QueryStatsSnapshot {
        let inner = self.inner.lock().expect("query stats mutex poisoned");
        QueryStatsSnapshot {
            total: inner.total,
            failed: inner.failed,
            rolled_back: inner.rolled_back,
            slow: inner.slow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn records_slow_queries() {
        let stats = QueryStats::new();
        let _: Result<(), ()> = stats.record("slow", || {
            sleep(Duration::from_millis(1));
            Ok(())
        });
        let snap = stats.snapshot();
        assert_eq!(snap.total, 1);
        assert_eq!(snap.failed, 0);
    }

    #[test]
    fn records_failures() {
        let stats = QueryStats::new();
        let _: Result<(), &str> = stats.record("fail", || Err("boom"));
        let snap = stats.snapshot();
        assert_eq!(snap.total, 1);
        assert_eq!(snap.failed, 1);
    }
}
