//! The `subsystems` table: named sub-instances reported within a worker's
//! heartbeat (spec §4.2), used to compute real instance counts.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::{schema::subsystems, storage::Storage, Error};

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = subsystems)]
pub struct Subsystem {
    pub id: i32,
    pub worker_id: i64,
    pub label: String,
    pub instances_online: i32,
    pub last_heartbeat_ts: Option<NaiveDateTime>,
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = subsystems)]
struct NewSubsystem<'a> {
    worker_id: i64,
    label: &'a str,
    instances_online: i32,
    last_heartbeat_ts: Option<NaiveDateTime>,
}

impl Storage {
    /// Upserts a worker's reported subsystem instance count. Subsystems are
    /// keyed by `(worker_id, label)`; a heartbeat that omits a previously
    /// reported label simply leaves that subsystem's row stale rather than
    /// deleting it, matching spec §4.3's real-instance-count rule of
    /// counting only subsystems heartbeated within the inactivity window.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying upsert fails.
    pub fn upsert_subsystem(
        &self,
        worker_id: i64,
        label: &str,
        instances_online: i32,
        ts: NaiveDateTime,
    ) -> Result<(), Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("upsert_subsystem", || {
            conn.transaction(|conn| {
                let existing: Option<Subsystem> = subsystems::table
                    .filter(subsystems::worker_id.eq(worker_id))
                    .filter(subsystems::label.eq(label))
                    .first(conn)
                    .optional()?;

                if let Some(existing) = existing {
                    diesel::update(subsystems::table.find(existing.id))
                        .set((
                            subsystems::instances_online.eq(instances_online),
                            subsystems::last_heartbeat_ts.eq(Some(ts)),
                        ))
                        .execute(conn)?;
                } else {
                    diesel::insert_into(subsystems::table)
                        .values(&NewSubsystem {
                            worker_id,
                            label,
                            instances_online,
                            last_heartbeat_ts: Some(ts),
                        })
                        .execute(conn)?;
                }
                Ok::<_, diesel::result::Error>(())
            })
            .map_err(Error::Query)
        })
    }

    /// Lists the subsystems heartbeated for `worker_id` no earlier than
    /// `since`, the basis for the real-instance-count aggregation of spec
    /// §4.3.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn list_active_subsystems(
        &self,
        worker_id: i64,
        since: NaiveDateTime,
    ) -> Result<Vec<Subsystem>, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("list_active_subsystems", || {
            subsystems::table
                .filter(subsystems::worker_id.eq(worker_id))
                .filter(subsystems::last_heartbeat_ts.ge(since))
                .load(&mut *conn)
                .map_err(Error::Query)
        })
    }
}
