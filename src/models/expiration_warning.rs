//! The `expiration_warnings` table: records that a GodPack was flagged as
//! approaching expiry, so the expiration scan (spec §4.5) warns once.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::{schema::expiration_warnings, storage::Storage, Error};

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = expiration_warnings)]
pub struct ExpirationWarning {
    pub id: i32,
    pub gp_id: i32,
    pub warned_at_ts: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = expiration_warnings)]
struct NewExpirationWarning {
    gp_id: i32,
    warned_at_ts: NaiveDateTime,
}

impl Storage {
    /// Returns whether `gp_id` has already been warned about since `since`
    /// — the "at-most-one warning per GP per rolling 24h" rule of spec §3.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn has_expiration_warning(
        &self,
        gp_id: i32,
        since: NaiveDateTime,
    ) -> Result<bool, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("has_expiration_warning", || {
            expiration_warnings::table
                .filter(expiration_warnings::gp_id.eq(gp_id))
                .filter(expiration_warnings::warned_at_ts.ge(since))
                .count()
                .get_result::<i64>(&mut *conn)
                .map(|n| n > 0)
                .map_err(Error::Query)
        })
    }

    /// Records that `gp_id` was warned about at `ts`. Idempotent in effect:
    /// callers should check [`Storage::has_expiration_warning`] first, but a
    /// duplicate row here is harmless since only existence is ever queried.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying insert fails.
    pub fn record_expiration_warning(&self, gp_id: i32, ts: NaiveDateTime) -> Result<(), Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("record_expiration_warning", || {
            diesel::insert_into(expiration_warnings::table)
                .values(&NewExpirationWarning {
                    gp_id,
                    warned_at_ts: ts,
                })
                .execute(&mut *conn)
                .map(|_| ())
                .map_err(Error::Query)
        })
    }
}
