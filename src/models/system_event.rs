//! The `system_events` table: the append-only audit log every subsystem
//! writes to and the emission bus (spec §4.7) fans out from.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use strum_macros::{Display, EnumString};

use crate::{schema::system_events, storage::Storage, Error};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = system_events)]
pub struct SystemEvent {
    pub id: i32,
    pub event_type: String,
    pub severity: String,
    pub payload: String,
    pub actor_worker_id: Option<i64>,
    pub ts: NaiveDateTime,
}

impl SystemEvent {
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity.parse().unwrap_or(Severity::Info)
    }
}

#[derive(Insertable)]
#[diesel(table_name = system_events)]
pub struct NewSystemEvent<'a> {
    pub event_type: &'a str,
    pub severity: &'a str,
    pub payload: &'a str,
    pub actor_worker_id: Option<i64>,
    pub ts: NaiveDateTime,
}

impl Storage {
    /// Appends an audit log entry. Never fails the caller's operation in
    /// practice since the write is local and synchronous, but the `Result`
    /// is surfaced so a full disk is observable.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying insert fails.
    pub fn insert_system_event(&self, new: &NewSystemEvent<'_>) -> Result<i32, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("insert_system_event", || {
            conn.transaction(|conn| {
                diesel::insert_into(system_events::table)
                    .values(new)
                    .execute(conn)?;
                system_events::table
                    .order(system_events::id.desc())
                    .select(system_events::id)
                    .first(conn)
            })
            .map_err(Error::Query)
        })
    }

    /// Lists the most recent `limit` events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn recent_system_events(&self, limit: i64) -> Result<Vec<SystemEvent>, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("recent_system_events", || {
            system_events::table
                .order(system_events::ts.desc())
                .limit(limit)
                .load(&mut *conn)
                .map_err(Error::Query)
        })
    }
}
