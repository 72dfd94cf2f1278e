//! The `godpacks` table: one row per discovered GodPack, tracked through its
//! testing → alive/dead/invalid → expired lifecycle (spec §4.4).

use chrono::NaiveDateTime;
use diesel::prelude::*;
use strum_macros::{Display, EnumString};

use crate::{schema::godpacks, storage::Storage, Error};

/// A GodPack's lifecycle state (spec §4.4's state table).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum GpState {
    Testing,
    Alive,
    Dead,
    Invalid,
    Expired,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = godpacks, primary_key(gp_id))]
pub struct GodPack {
    pub gp_id: i32,
    pub discovery_message_id: String,
    pub discovery_ts: NaiveDateTime,
    pub pack_slot_count: i16,
    pub account_name: String,
    pub friend_code: String,
    pub screenshot_url: Option<String>,
    pub state: String,
    #[diesel(column_name = ratio)]
    ratio_raw: Option<i16>,
    pub expires_at: NaiveDateTime,
    pub discovered_by: Option<i64>,
}

impl GodPack {
    #[must_use]
    pub fn state(&self) -> GpState {
        self.state.parse().unwrap_or(GpState::Testing)
    }

    /// The open-slot-to-friend ratio observed on the most recent OPEN test,
    /// or `None` if it is not yet known. The `-1` sentinel stored in the
    /// `ratio` column is confined to this boundary.
    #[must_use]
    pub fn ratio(&self) -> Option<i16> {
        self.ratio_raw.filter(|&r| r >= 0)
    }
}

#[derive(Insertable)]
#[diesel(table_name = godpacks)]
pub struct NewGodPack<'a> {
    pub discovery_message_id: &'a str,
    pub discovery_ts: NaiveDateTime,
    pub pack_slot_count: i16,
    pub account_name: &'a str,
    pub friend_code: &'a str,
    pub screenshot_url: Option<&'a str>,
    pub state: &'a str,
    #[diesel(column_name = ratio)]
    pub ratio_raw: Option<i16>,
    pub expires_at: NaiveDateTime,
    pub discovered_by: Option<i64>,
}

impl Storage {
    /// Inserts a newly discovered GodPack, ignoring the write if
    /// `discovery_message_id` was already recorded. Returns the row's id
    /// either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying insert/select fails.
    pub fn insert_godpack(&self, new: &NewGodPack<'_>) -> Result<i32, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("insert_godpack", || {
            conn.transaction(|conn| {
                diesel::insert_or_ignore_into(godpacks::table)
                    .values(new)
                    .execute(conn)?;
                godpacks::table
                    .filter(godpacks::discovery_message_id.eq(new.discovery_message_id))
                    .select(godpacks::gp_id)
                    .first(conn)
            })
            .map_err(Error::Query)
        })
    }

    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn get_godpack(&self, gp_id: i32) -> Result<Option<GodPack>, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("get_godpack", || {
            godpacks::table
                .find(gp_id)
                .first(&mut *conn)
                .optional()
                .map_err(Error::Query)
        })
    }

    /// Moves a GodPack to `state`, enforcing the forward-only transitions of
    /// spec §4.4 (`TESTING` → `ALIVE`/`DEAD`/`INVALID`, `ALIVE` → `EXPIRED`).
    ///
    /// # Errors
    ///
    /// Returns an error if the transition is not allowed or the update
    /// fails.
    pub fn transition_godpack(&self, gp_id: i32, to: GpState) -> Result<(), Error> {
        let gp = self
            .get_godpack(gp_id)?
            .ok_or_else(|| Error::InvalidInput(format!("unknown godpack {gp_id}")))?;
        let from = gp.state();

        let allowed = matches!(
            (from, to),
            (GpState::Testing, GpState::Alive)
                | (GpState::Testing, GpState::Dead)
                | (GpState::Testing, GpState::Invalid)
                | (GpState::Alive, GpState::Expired)
        );
        if !allowed {
            return Err(Error::InvalidInput(format!(
                "illegal godpack transition {from} -> {to}"
            )));
        }

        let mut conn = self.pool.get()?;
        self.stats.record("transition_godpack", || {
            diesel::update(godpacks::table.find(gp_id))
                .set(godpacks::state.eq(to.to_string()))
                .execute(&mut *conn)
                .map(|_| ())
                .map_err(Error::Query)
        })
    }

    /// Records the most recently observed open-slot ratio for a GodPack.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying update fails.
    pub fn set_godpack_ratio(&self, gp_id: i32, ratio: Option<i16>) -> Result<(), Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("set_godpack_ratio", || {
            diesel::update(godpacks::table.find(gp_id))
                .set(godpacks::ratio.eq(ratio.unwrap_or(-1)))
                .execute(&mut *conn)
                .map(|_| ())
                .map_err(Error::Query)
        })
    }

    /// Lists GodPacks currently in `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn list_godpacks_by_state(&self, state: GpState) -> Result<Vec<GodPack>, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("list_godpacks_by_state", || {
            godpacks::table
                .filter(godpacks::state.eq(state.to_string()))
                .load(&mut *conn)
                .map_err(Error::Query)
        })
    }

}
