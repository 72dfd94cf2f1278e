//! The `gp_statistics` table: a 5-minute cache of the verification engine's
//! most recent Bayesian estimate for a GodPack (spec §4.4/§9).

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::{schema::gp_statistics, storage::Storage, Error};

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = gp_statistics, primary_key(gp_id))]
pub struct GpStatistics {
    pub gp_id: i32,
    pub probability_alive: f64,
    pub total_tests: i32,
    pub miss_tests: i32,
    pub noshow_tests: i32,
    pub confidence_level: f64,
    pub last_calculated_ts: NaiveDateTime,
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = gp_statistics)]
pub struct NewGpStatistics {
    pub gp_id: i32,
    pub probability_alive: f64,
    pub total_tests: i32,
    pub miss_tests: i32,
    pub noshow_tests: i32,
    pub confidence_level: f64,
    pub last_calculated_ts: NaiveDateTime,
}

impl Storage {
    /// Reads the cached estimate for a GodPack, if one has been computed.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn get_gp_statistics(&self, gp_id: i32) -> Result<Option<GpStatistics>, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("get_gp_statistics", || {
            gp_statistics::table
                .find(gp_id)
                .first(&mut *conn)
                .optional()
                .map_err(Error::Query)
        })
    }

    /// Upserts the cached estimate, replacing whatever was there before.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying upsert fails.
    pub fn put_gp_statistics(&self, new: &NewGpStatistics) -> Result<(), Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("put_gp_statistics", || {
            conn.transaction(|conn| {
                let existing = gp_statistics::table
                    .find(new.gp_id)
                    .count()
                    .get_result::<i64>(conn)?;
                if existing > 0 {
                    diesel::update(gp_statistics::table.find(new.gp_id))
                        .set(new)
                        .execute(conn)?;
                } else {
                    diesel::insert_into(gp_statistics::table)
                        .values(new)
                        .execute(conn)?;
                }
                Ok::<_, diesel::result::Error>(())
            })
            .map_err(Error::Query)
        })
    }
}
