//! Scoped transaction handle.
//!
//! `with_transaction` commits on a normal return and rolls back and
//! re-raises on any `Err`. Diesel tracks transaction depth per connection,
//! so a call nested inside another `with_transaction` on the same
//! connection reuses the ambient transaction as a savepoint rather than
//! opening an unrelated one; only the outermost scope issues the `COMMIT`.

use diesel::{connection::Connection, sqlite::SqliteConnection};

use crate::Error;

/// Runs `body` inside a transaction on `conn`.
///
/// # Errors
///
/// Propagates whatever error `body` returns, after rolling back every
/// savepoint opened since the ambient transaction (if any) started.
pub fn with_transaction<T, F>(conn: &mut SqliteConnection, body: F) -> Result<T, Error>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T, Error>,
{
    conn.transaction(|conn| body(conn))
}
