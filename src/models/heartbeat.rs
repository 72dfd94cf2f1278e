//! The `heartbeats` table: one row per accepted heartbeat message, retained
//! as the audit trail behind the derived `workers`/`subsystems` counters.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::{schema::heartbeats, storage::Storage, Error};

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = heartbeats)]
pub struct Heartbeat {
    pub id: i32,
    pub message_id: String,
    pub worker_id: i64,
    pub ts: NaiveDateTime,
    pub instances_online: i32,
    pub instances_offline: i32,
    pub time_running_minutes: i32,
    pub packs_cumulative: i64,
    pub main_active: bool,
    pub selected_packs: String,
}

#[derive(Insertable)]
#[diesel(table_name = heartbeats)]
pub struct NewHeartbeat<'a> {
    pub message_id: &'a str,
    pub worker_id: i64,
    pub ts: NaiveDateTime,
    pub instances_online: i32,
    pub instances_offline: i32,
    pub time_running_minutes: i32,
    pub packs_cumulative: i64,
    pub main_active: bool,
    pub selected_packs: &'a str,
}

impl Storage {
    /// Inserts a heartbeat row, ignoring the write if `message_id` was
    /// already recorded (spec §4.2's at-least-once delivery guarantee).
    /// Returns `true` if a new row was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying insert fails.
    pub fn insert_heartbeat(&self, new: &NewHeartbeat<'_>) -> Result<bool, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("insert_heartbeat", || {
            diesel::insert_or_ignore_into(heartbeats::table)
                .values(new)
                .execute(&mut *conn)
                .map(|rows| rows > 0)
                .map_err(Error::Query)
        })
    }

    /// Returns the heartbeat previously recorded under `message_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn get_heartbeat_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<Heartbeat>, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("get_heartbeat_by_message_id", || {
            heartbeats::table
                .filter(heartbeats::message_id.eq(message_id))
                .first(&mut *conn)
                .optional()
                .map_err(Error::Query)
        })
    }

    /// Returns the most recent heartbeats for `worker_id`, newest first,
    /// used to derive a run's average/peak instance counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn recent_heartbeats(
        &self,
        worker_id: i64,
        since: NaiveDateTime,
    ) -> Result<Vec<Heartbeat>, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("recent_heartbeats", || {
            heartbeats::table
                .filter(heartbeats::worker_id.eq(worker_id))
                .filter(heartbeats::ts.ge(since))
                .order(heartbeats::ts.desc())
                .load(&mut *conn)
                .map_err(Error::Query)
        })
    }

    /// Deletes heartbeat rows older than `older_than`, returning the number
    /// of rows removed. Heartbeats are retained only as an audit trail
    /// behind the derived worker/subsystem counters, so purging them has no
    /// effect on registry state.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying delete fails.
    pub fn purge_old_heartbeats(&self, older_than: NaiveDateTime) -> Result<usize, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("purge_old_heartbeats", || {
            diesel::delete(heartbeats::table.filter(heartbeats::ts.lt(older_than)))
                .execute(&mut *conn)
                .map_err(Error::Query)
        })
    }
}
