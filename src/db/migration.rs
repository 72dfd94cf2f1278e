//! Schema version tracking and migration application.
//!
//! Pending migrations are applied in order at startup. Each migration is
//! preceded by an automatic `SCHEMA_CHANGE` backup and wrapped in its own
//! transaction; a failed migration aborts startup without recording the new
//! version (spec §4.1).

use diesel::connection::SimpleConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::{error, info};

use crate::{
    db::{backup::BackupKind, pool::ConnectionPool, BackupManager},
    schema::schema_version,
    Error,
};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies every pending migration in [`MIGRATIONS`], in order, creating a
/// `SCHEMA_CHANGE` backup before each one.
///
/// # Errors
///
/// Returns an error, and leaves the recorded schema version unchanged, if
/// the pre-migration backup or a migration itself fails. Both are fatal;
/// `godpack-cored` narrows to exit code 3 only for an actual migration
/// failure (spec §6), since a backup failure is a datastore fault rather
/// than evidence the schema is broken.
pub fn run_pending_migrations(
    pool: &ConnectionPool,
    backups: &BackupManager,
) -> Result<u32, Error> {
    let mut conn = pool.get()?;

    ensure_version_table(&mut conn)?;

    let pending = conn
        .pending_migrations(MIGRATIONS)
        .map_err(|e| Error::Migration(e.to_string()))?;

    for migration in &pending {
        let name = migration.name();
        info!(migration = %name, "applying schema migration");
        if let Err(e) = backups.create(BackupKind::SchemaChange) {
            error!(migration = %name, error = %e, "pre-migration backup failed, aborting migration");
            return Err(e);
        }

        if let Err(e) = conn.run_migration(migration.as_ref()) {
            error!(migration = %name, error = %e, "migration failed");
            return Err(Error::Migration(e.to_string()));
        }
    }

    let applied = conn
        .applied_migrations()
        .map_err(|e| Error::Migration(e.to_string()))?;
    let version = u32::try_from(applied.len()).unwrap_or(u32::MAX);
    record_version(&mut conn, version)?;
    Ok(version)
}

/// Returns the schema version currently recorded in `schema_version`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn current_version(pool: &ConnectionPool) -> Result<u32, Error> {
    use diesel::prelude::*;

    let mut conn = pool.get()?;
    ensure_version_table(&mut conn)?;
    let version: Option<i32> = schema_version::table
        .select(schema_version::version)
        .first(&mut *conn)
        .optional()
        .map_err(Error::Query)?;
    Ok(version.map_or(0, |v| v.max(0) as u32))
}

/// Returns whether any migration in [`MIGRATIONS`] has not yet been
/// applied. Used by the startup validator (`SPEC_FULL.md` §10) as a
/// defense-in-depth check after [`run_pending_migrations`] should already
/// have caught everything up.
///
/// # Errors
///
/// Returns an error if the underlying query fails.
pub fn has_pending_migrations(pool: &ConnectionPool) -> Result<bool, Error> {
    let mut conn = pool.get()?;
    let pending = conn
        .pending_migrations(MIGRATIONS)
        .map_err(|e| Error::Migration(e.to_string()))?;
    Ok(!pending.is_empty())
}

fn ensure_version_table(conn: &mut diesel::sqlite::SqliteConnection) -> Result<(), Error> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")
        .map_err(Error::Query)
}

fn record_version(conn: &mut diesel::sqlite::SqliteConnection, version: u32) -> Result<(), Error> {
    use diesel::prelude::*;

    conn.transaction(|conn| {
        diesel::delete(schema_version::table).execute(conn)?;
        diesel::insert_into(schema_version::table)
            .values(schema_version::version.eq(version as i32))
            .execute(conn)?;
        Ok::<_, diesel::result::Error>(())
    })
    .map_err(Error::Query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn migrations_apply_and_record_version() {
        let data_dir = tempfile::tempdir().unwrap();
        let db_path = data_dir.path().join("state.db");
        let pool = ConnectionPool::new(&db_path, 5, Duration::from_secs(5)).unwrap();
        let backups =
            BackupManager::new(data_dir.path().join("backups"), pool.clone(), &db_path).unwrap();

        let version = run_pending_migrations(&pool, &backups).unwrap();
        assert!(version >= 1);
        assert_eq!(current_version(&pool).unwrap(), version);
    }
}
