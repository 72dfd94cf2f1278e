//! The `test_results` table: one row per MISS/NOSHOW observation against a
//! GodPack (spec §4.4), the evidence feeding the verification engine's
//! Bayesian update.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use strum_macros::{Display, EnumString};

use crate::{schema::test_results, storage::Storage, Error};

/// The outcome of a single friend-add test against a GodPack.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum TestKind {
    Miss,
    Noshow,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = test_results)]
pub struct TestResult {
    pub id: i32,
    pub worker_id: i64,
    pub gp_id: i32,
    pub ts: NaiveDateTime,
    pub kind: String,
    pub open_slots: Option<i32>,
    pub friend_count: Option<i32>,
}

impl TestResult {
    #[must_use]
    pub fn kind(&self) -> TestKind {
        self.kind.parse().unwrap_or(TestKind::Miss)
    }
}

#[derive(Insertable)]
#[diesel(table_name = test_results)]
pub struct NewTestResult<'a> {
    pub worker_id: i64,
    pub gp_id: i32,
    pub ts: NaiveDateTime,
    pub kind: &'a str,
    pub open_slots: Option<i32>,
    pub friend_count: Option<i32>,
}

impl Storage {
    /// Records a test result. Callers are expected to have already
    /// deduplicated by the originating message id (spec §4.2); this insert
    /// is unconditional.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying insert fails.
    pub fn insert_test_result(&self, new: &NewTestResult<'_>) -> Result<i32, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("insert_test_result", || {
            conn.transaction(|conn| {
                diesel::insert_into(test_results::table)
                    .values(new)
                    .execute(conn)?;
                test_results::table
                    .order(test_results::id.desc())
                    .select(test_results::id)
                    .first(conn)
            })
            .map_err(Error::Query)
        })
    }

    /// Lists every test result recorded for a GodPack, oldest first — the
    /// full evidence trail the verification engine folds into its estimate.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn list_test_results_for_godpack(&self, gp_id: i32) -> Result<Vec<TestResult>, Error> {
        let mut conn = self.pool.get()?;
        self.stats.record("list_test_results_for_godpack", || {
            test_results::table
                .filter(test_results::gp_id.eq(gp_id))
                .order(test_results::ts.asc())
                .load(&mut *conn)
                .map_err(Error::Query)
        })
    }
}
