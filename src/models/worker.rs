//! The `workers` table: identity, status, and derived counters (spec §3).

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{schema::workers, storage::Storage, Error};

/// A worker's current lifecycle state (spec §4.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum WorkerStatus {
    Active,
    Inactive,
    Farm,
    Leech,
    Banned,
    Premium,
}

#[derive(Debug, Clone, Queryable, Identifiable, AsChangeset, Serialize)]
#[diesel(table_name = workers, primary_key(worker_id))]
pub struct Worker {
    pub worker_id: i64,
    pub display_name: Option<String>,
    pub player_id: Option<String>,
    pub status: String,
    pub total_packs: i64,
    pub total_gps: i64,
    pub average_instances: f64,
    pub last_heartbeat_ts: Option<NaiveDateTime>,
    pub banned_at: Option<NaiveDateTime>,
}

impl Worker {
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        self.status.parse().unwrap_or(WorkerStatus::Inactive)
    }
}

#[derive(Insertable)]
#[diesel(table_name = workers)]
struct NewWorker {
    worker_id: i64,
    status: String,
}

impl Storage {
    /// Returns the worker with the given id, if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn get_worker(&self, worker_id: i64) -> Result<Option<Worker>, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("get_worker", || {
            workers::table
                .find(worker_id)
                .first(&mut *conn)
                .optional()
                .map_err(Error::Query)
        })
    }

    /// Creates the worker row if it doesn't exist yet. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying insert fails for a reason other
    /// than the row already existing.
    pub fn ensure_worker(&self, worker_id: i64) -> Result<(), Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("ensure_worker", || {
            diesel::insert_or_ignore_into(workers::table)
                .values(&NewWorker {
                    worker_id,
                    status: WorkerStatus::Inactive.to_string(),
                })
                .execute(&mut *conn)
                .map(|_| ())
                .map_err(Error::Query)
        })
    }

    /// Sets `status`, enforcing the guards of spec §4.3's state table.
    ///
    /// # Errors
    ///
    /// Returns an error if the guard is not satisfied or the update fails.
    pub fn set_worker_status(
        &self,
        worker_id: i64,
        status: WorkerStatus,
        leech_min_gp: i64,
        leech_min_packs: i64,
        leech_enabled: bool,
    ) -> Result<(), Error> {
        let worker = self
            .get_worker(worker_id)?
            .ok_or_else(|| Error::InvalidInput(format!("unknown worker {worker_id}")))?;

        match status {
            WorkerStatus::Active | WorkerStatus::Farm => {
                if worker.player_id.is_none() {
                    return Err(Error::InvalidInput(
                        "cannot activate a worker without a player_id".into(),
                    ));
                }
            }
            WorkerStatus::Leech => {
                if !leech_enabled
                    || worker.total_gps < leech_min_gp
                    || worker.total_packs < leech_min_packs
                {
                    return Err(Error::InvalidInput(
                        "worker does not meet leech thresholds".into(),
                    ));
                }
            }
            WorkerStatus::Inactive | WorkerStatus::Banned | WorkerStatus::Premium => {}
        }

        let mut conn = self.pool.get()?;
        let banned_at = if status == WorkerStatus::Banned {
            Some(Utc::now().naive_utc())
        } else {
            worker.banned_at
        };
        self.stats.record("set_worker_status", || {
            diesel::update(workers::table.find(worker_id))
                .set((
                    workers::status.eq(status.to_string()),
                    workers::banned_at.eq(banned_at),
                ))
                .execute(&mut *conn)
                .map(|_| ())
                .map_err(Error::Query)
        })
    }

    /// Applies the effect of one heartbeat on `workers`: creates the row if
    /// absent, bumps `total_packs` to `max(total_packs, packs_cumulative)`
    /// (spec §9's open-question resolution), and advances
    /// `last_heartbeat_ts` only forward.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying update fails.
    pub fn apply_heartbeat_to_worker(
        &self,
        worker_id: i64,
        ts: NaiveDateTime,
        packs_cumulative: i64,
    ) -> Result<(), Error> {
        self.ensure_worker(worker_id)?;
        let mut conn = self.pool.get()?;
        self.stats.record("apply_heartbeat_to_worker", || {
            conn.transaction(|conn| {
                let current: Worker = workers::table.find(worker_id).first(conn)?;
                let new_total_packs = current.total_packs.max(packs_cumulative);
                let new_last_hb = match current.last_heartbeat_ts {
                    Some(existing) if existing >= ts => existing,
                    _ => ts,
                };
                diesel::update(workers::table.find(worker_id))
                    .set((
                        workers::total_packs.eq(new_total_packs),
                        workers::last_heartbeat_ts.eq(new_last_hb),
                    ))
                    .execute(conn)?;
                Ok::<_, diesel::result::Error>(())
            })
            .map_err(Error::Query)
        })
    }

    /// Increments `total_gps` for a worker credited with discovering a GP.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying update fails.
    pub fn credit_gp_discovery(&self, worker_id: i64) -> Result<(), Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("credit_gp_discovery", || {
            diesel::update(workers::table.find(worker_id))
                .set(workers::total_gps.eq(workers::total_gps + 1))
                .execute(&mut *conn)
                .map(|_| ())
                .map_err(Error::Query)
        })
    }

    /// Lists workers with the given status, ordered by descending
    /// `total_packs`. [`crate::registry::Registry::sorted_view`] is the
    /// spec §4.3 cross-status priority-then-`packs_per_min` ranking; this
    /// is the plain single-status filter other callers (e.g. the auto-kick
    /// sweep) use where ordering doesn't matter.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn list_workers_by_status(&self, status: WorkerStatus) -> Result<Vec<Worker>, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("list_workers_by_status", || {
            workers::table
                .filter(workers::status.eq(status.to_string()))
                .order(workers::total_packs.desc())
                .load(&mut *conn)
                .map_err(Error::Query)
        })
    }

    /// Sets a worker's `display_name`, e.g. from explicit registration or
    /// for later name-based lookup during ingestion (spec §4.2).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying update fails.
    pub fn set_display_name(&self, worker_id: i64, display_name: &str) -> Result<(), Error> {
        self.ensure_worker(worker_id)?;
        let mut conn = self.pool.get()?;
        self.stats.record("set_display_name", || {
            diesel::update(workers::table.find(worker_id))
                .set(workers::display_name.eq(display_name))
                .execute(&mut *conn)
                .map(|_| ())
                .map_err(Error::Query)
        })
    }

    /// Resolves a worker-identity line that isn't numeric against
    /// `display_name` (spec §4.2's name-resolution path for heartbeat
    /// ingestion).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn find_worker_by_display_name(&self, display_name: &str) -> Result<Option<Worker>, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("find_worker_by_display_name", || {
            workers::table
                .filter(workers::display_name.eq(display_name))
                .first(&mut *conn)
                .optional()
                .map_err(Error::Query)
        })
    }

    /// Lists every worker, for scheduled sweeps.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn list_all_workers(&self) -> Result<Vec<Worker>, Error> {
        let mut conn = self.pool.get()?;
        self.stats
            .record("list_all_workers", || workers::table.load(&mut *conn).map_err(Error::Query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn storage() -> Storage {
        let dir = tempfile::tempdir().unwrap().keep();
        Storage::open(&dir, 5, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn heartbeat_create_worker_and_totals() {
        let s = storage();
        s.apply_heartbeat_to_worker(42, Utc::now().naive_utc(), 4250)
            .unwrap();
        let w = s.get_worker(42).unwrap().unwrap();
        assert_eq!(w.total_packs, 4250);

        // An older ts should not move last_heartbeat_ts backwards, and a
        // lower packs_cumulative should not shrink total_packs.
        let earlier = Utc::now().naive_utc() - chrono::Duration::hours(1);
        s.apply_heartbeat_to_worker(42, earlier, 10).unwrap();
        let w2 = s.get_worker(42).unwrap().unwrap();
        assert_eq!(w2.total_packs, 4250);
        assert!(w2.last_heartbeat_ts.unwrap() >= w.last_heartbeat_ts.unwrap());
    }
}
