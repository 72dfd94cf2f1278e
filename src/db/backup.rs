//! Backup manager: byte-identical snapshots of the datastore, with JSON
//! sidecars, gzip compression for large backups, and kind-scoped retention.

use std::{
    collections::HashMap,
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use chrono::{DateTime, Utc};
use diesel::{connection::SimpleConnection, prelude::*, sql_query};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::info;

use crate::{db::pool::ConnectionPool, Error};

const COMPRESSION_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_RETENTION_DAYS: i64 = 30;
const DEFAULT_MAX_BACKUP_COUNT: usize = 50;

const KNOWN_TABLES: &[&str] = &[
    "workers",
    "subsystems",
    "heartbeats",
    "runs",
    "godpacks",
    "test_results",
    "gp_statistics",
    "expiration_warnings",
    "system_events",
];

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Deserialize, Serialize, EnumString)]
pub enum BackupKind {
    #[strum(serialize = "MANUAL")]
    Manual,
    #[strum(serialize = "AUTOMATIC")]
    Automatic,
    #[strum(serialize = "SCHEMA_CHANGE")]
    SchemaChange,
    #[strum(serialize = "MIGRATION")]
    Migration,
    #[strum(serialize = "SCHEDULED")]
    Scheduled,
    #[strum(serialize = "EMERGENCY")]
    Emergency,
}

impl BackupKind {
    fn dir_name(self) -> &'static str {
        match self {
            BackupKind::Manual => "MANUAL",
            BackupKind::Automatic => "AUTOMATIC",
            BackupKind::SchemaChange => "SCHEMA_CHANGE",
            BackupKind::Migration => "MIGRATION",
            BackupKind::Scheduled => "SCHEDULED",
            BackupKind::Emergency => "EMERGENCY",
        }
    }
}

/// JSON sidecar accompanying each `.dbc` backup file.
#[derive(Debug, Deserialize, Serialize)]
pub struct BackupSidecar {
    pub kind: BackupKind,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub duration_ms: u64,
    pub integrity_ok: bool,
    pub table_counts: HashMap<String, i64>,
    pub gzip: bool,
}

#[derive(Debug)]
pub struct BackupDescriptor {
    pub path: PathBuf,
    pub sidecar_path: PathBuf,
    pub sidecar: BackupSidecar,
}

/// Creates, lists, restores, and prunes backups of the embedded datastore.
#[derive(Clone)]
pub struct BackupManager {
    root: PathBuf,
    pool: ConnectionPool,
    live_db_path: PathBuf,
    retention_days: i64,
    max_backup_count: usize,
}

impl BackupManager {
    /// # Errors
    ///
    /// Returns an error if the backup root directory cannot be created.
    pub fn new(root: PathBuf, pool: ConnectionPool, live_db_path: &Path) -> Result<Self, Error> {
        fs::create_dir_all(&root).map_err(Error::Io)?;
        Ok(Self {
            root,
            pool,
            live_db_path: live_db_path.to_path_buf(),
            retention_days: DEFAULT_RETENTION_DAYS,
            max_backup_count: DEFAULT_MAX_BACKUP_COUNT,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn with_retention(mut self, retention_days: i64, max_backup_count: usize) -> Self {
        self.retention_days = retention_days;
        self.max_backup_count = max_backup_count;
        self
    }

    /// Creates a new backup of `kind`, checkpointing the WAL first so the
    /// copied file is a consistent, byte-identical snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint, copy, or sidecar write fails. A
    /// failure here is non-fatal to the caller except along the schema-change
    /// path, which must abort the migration (spec §7).
    pub fn create(&self, kind: BackupKind) -> Result<BackupDescriptor, Error> {
        let start = Instant::now();
        let mut conn = self.pool.get()?;
        conn.batch_execute("PRAGMA wal_checkpoint(TRUNCATE);")
            .map_err(Error::Query)?;
        drop(conn);

        let dir = self.root.join(kind.dir_name());
        fs::create_dir_all(&dir).map_err(Error::Io)?;

        let now = Utc::now();
        let file_stem = now.format("%Y%m%dT%H%M%S%.3f").to_string();
        let mut dest = dir.join(format!("{file_stem}.dbc"));
        let raw = fs::read(&self.live_db_path).map_err(Error::Io)?;
        let size = raw.len() as u64;

        let gzip = size > COMPRESSION_THRESHOLD_BYTES;
        if gzip {
            dest.set_extension("dbc.gz");
            let file = fs::File::create(&dest).map_err(Error::Io)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(&raw).map_err(Error::Io)?;
            encoder.finish().map_err(Error::Io)?;
        } else {
            fs::write(&dest, &raw).map_err(Error::Io)?;
        }

        let table_counts = self.table_counts()?;
        let integrity_ok = self.verify_integrity(&dest, gzip).unwrap_or(false);

        let sidecar = BackupSidecar {
            kind,
            created_at: now,
            size_bytes: size,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            integrity_ok,
            table_counts,
            gzip,
        };
        let sidecar_path = sidecar_path_for(&dest);
        fs::write(&sidecar_path, serde_json::to_vec_pretty(&sidecar)?).map_err(Error::Io)?;

        info!(kind = %kind, path = %dest.display(), "backup created");
        self.sweep(kind)?;

        Ok(BackupDescriptor {
            path: dest,
            sidecar_path,
            sidecar,
        })
    }

    fn table_counts(&self) -> Result<HashMap<String, i64>, Error> {
        let mut conn = self.pool.get()?;
        let mut counts = HashMap::new();
        for table in KNOWN_TABLES {
            let count: i64 = sql_query(format!("SELECT COUNT(*) as count FROM {table}"))
                .get_result::<TableCount>(&mut *conn)
                .map(|r| r.count)
                .unwrap_or(0);
            counts.insert((*table).to_string(), count);
        }
        Ok(counts)
    }

    /// Verifies a backup file's integrity, decompressing to a temporary
    /// location first if it was gzip-compressed.
    fn verify_integrity(&self, path: &Path, gzip: bool) -> Result<bool, Error> {
        let bytes = read_backup_bytes(path, gzip)?;
        // A minimal SQLite file starts with this 16-byte magic header.
        Ok(bytes.len() >= 16 && &bytes[0..16] == b"SQLite format 3\0")
    }

    /// Lists all known backups across every kind, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if a sidecar file cannot be read.
    pub fn list(&self) -> Result<Vec<BackupDescriptor>, Error> {
        let mut out = Vec::new();
        if !self.root.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(&self.root).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            if !entry.path().is_dir() {
                continue;
            }
            for file in fs::read_dir(entry.path()).map_err(Error::Io)? {
                let file = file.map_err(Error::Io)?;
                let path = file.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    continue;
                }
                let sidecar_path = sidecar_path_for(&path);
                if !sidecar_path.exists() {
                    continue;
                }
                let sidecar: BackupSidecar =
                    serde_json::from_slice(&fs::read(&sidecar_path).map_err(Error::Io)?)?;
                out.push(BackupDescriptor {
                    path,
                    sidecar_path,
                    sidecar,
                });
            }
        }
        out.sort_by(|a, b| b.sidecar.created_at.cmp(&a.sidecar.created_at));
        Ok(out)
    }

    /// Restores the live datastore from `descriptor`, first taking an
    /// `EMERGENCY` backup of the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if the candidate backup fails its integrity check,
    /// or if the pre-restore emergency backup fails.
    pub fn restore(&self, descriptor: &BackupDescriptor) -> Result<(), Error> {
        self.create(BackupKind::Emergency)?;

        if !self.verify_integrity(&descriptor.path, descriptor.sidecar.gzip)? {
            return Err(Error::Backup("candidate backup failed integrity check".into()));
        }

        let bytes = read_backup_bytes(&descriptor.path, descriptor.sidecar.gzip)?;
        fs::write(&self.live_db_path, bytes).map_err(Error::Io)?;
        info!(path = %descriptor.path.display(), "database restored from backup");
        Ok(())
    }

    /// Removes backups older than the retention horizon (doubled for
    /// `MANUAL` backups) and enforces the overall backup-count ceiling by
    /// evicting the oldest non-`MANUAL` backups first.
    ///
    /// # Errors
    ///
    /// Returns an error if a backup file cannot be removed.
    pub fn sweep(&self, just_created: BackupKind) -> Result<(), Error> {
        let now = Utc::now();
        let mut all = self.list()?;

        all.retain(|d| {
            let horizon_days = if d.sidecar.kind == BackupKind::Manual {
                self.retention_days * 2
            } else {
                self.retention_days
            };
            let age = now.signed_duration_since(d.sidecar.created_at);
            let expired = age.num_days() > horizon_days;
            if expired {
                let _ = fs::remove_file(&d.path);
                let _ = fs::remove_file(&d.sidecar_path);
            }
            !expired
        });

        if all.len() > self.max_backup_count {
            // `all` is newest-first; the tail holds the oldest entries.
            let mut evictable: Vec<usize> = all
                .iter()
                .enumerate()
                .filter(|(_, d)| d.sidecar.kind != BackupKind::Manual)
                .map(|(i, _)| i)
                .collect();
            evictable.sort_unstable_by(|a, b| b.cmp(a));
            let mut over = all.len() - self.max_backup_count;
            for idx in evictable {
                if over == 0 {
                    break;
                }
                let d = &all[idx];
                let _ = fs::remove_file(&d.path);
                let _ = fs::remove_file(&d.sidecar_path);
                over -= 1;
            }
        }

        let _ = just_created;
        Ok(())
    }
}

#[derive(QueryableByName)]
struct TableCount {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    count: i64,
}

fn sidecar_path_for(backup_path: &Path) -> PathBuf {
    let mut p = backup_path.to_path_buf();
    let file_name = format!("{}.json", backup_path.file_name().unwrap().to_string_lossy());
    p.set_file_name(file_name);
    p
}

fn read_backup_bytes(path: &Path, gzip: bool) -> Result<Vec<u8>, Error> {
    let raw = fs::read(path).map_err(Error::Io)?;
    if gzip {
        let mut decoder = GzDecoder::new(raw.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(Error::Io)?;
        Ok(out)
    } else {
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migration::run_pending_migrations;
    use std::time::Duration;

    #[test]
    fn backup_then_restore_round_trip() {
        let data_dir = tempfile::tempdir().unwrap();
        let db_path = data_dir.path().join("state.db");
        let pool = ConnectionPool::new(&db_path, 5, Duration::from_secs(5)).unwrap();
        let backups =
            BackupManager::new(data_dir.path().join("backups"), pool.clone(), &db_path).unwrap();
        run_pending_migrations(&pool, &backups).unwrap();

        let descriptor = backups.create(BackupKind::Manual).unwrap();
        assert!(descriptor.sidecar.integrity_ok);

        backups.restore(&descriptor).unwrap();
        let list = backups.list().unwrap();
        assert!(!list.is_empty());
    }
}
