//! The `runs` table: one row per contiguous worker session, cached after
//! being derived from its constituent heartbeats (spec §4.2/§9).

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::{schema::runs, storage::Storage, Error};

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = runs)]
pub struct Run {
    pub id: i32,
    pub worker_id: i64,
    pub start_ts: NaiveDateTime,
    pub end_ts: NaiveDateTime,
    pub start_packs: i64,
    pub end_packs: i64,
    pub avg_instances: f64,
    pub peak_instances: i32,
    pub packs_per_minute: f64,
    pub main_on_fraction: f64,
}

impl Run {
    /// Packs accrued over the lifetime of this run, the `session_packs`
    /// quantity of spec §9 (distinct from a worker's lifetime
    /// `total_packs`).
    #[must_use]
    pub fn session_packs(&self) -> i64 {
        self.end_packs - self.start_packs
    }
}

#[derive(Insertable)]
#[diesel(table_name = runs)]
pub struct NewRun {
    pub worker_id: i64,
    pub start_ts: NaiveDateTime,
    pub end_ts: NaiveDateTime,
    pub start_packs: i64,
    pub end_packs: i64,
    pub avg_instances: f64,
    pub peak_instances: i32,
    pub packs_per_minute: f64,
    pub main_on_fraction: f64,
}

impl Storage {
    /// Records a closed-out run.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying insert fails.
    pub fn insert_run(&self, new: &NewRun) -> Result<i32, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("insert_run", || {
            conn.transaction(|conn| {
                diesel::insert_into(runs::table).values(new).execute(conn)?;
                runs::table
                    .order(runs::id.desc())
                    .select(runs::id)
                    .first(conn)
            })
            .map_err(Error::Query)
        })
    }

    /// Lists runs for `worker_id` started no earlier than `since`, newest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn list_runs_since(
        &self,
        worker_id: i64,
        since: NaiveDateTime,
    ) -> Result<Vec<Run>, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("list_runs_since", || {
            runs::table
                .filter(runs::worker_id.eq(worker_id))
                .filter(runs::start_ts.ge(since))
                .order(runs::start_ts.desc())
                .load(&mut *conn)
                .map_err(Error::Query)
        })
    }
}
