//! `godpack-core`: the storage and coordination engine behind a fleet of
//! booster-pack reroll workers — ingestion, the worker/godpack registry,
//! Bayesian alive/dead verification, scheduled maintenance, and the
//! read-side query API, all built on an embedded, WAL-journaled SQLite
//! datastore that a single process owns exclusively.

#[macro_use]
extern crate diesel;

pub mod config;
pub mod core;
pub mod db;
pub mod events;
pub mod ingest;
pub mod models;
pub mod query;
pub mod registry;
mod schema;
pub mod scheduler;
pub mod storage;
pub mod verification;

pub use config::Config;
pub use core::Core;
pub use storage::Storage;

/// The crate-wide error type. Every fallible operation in `godpack-core`
/// returns this, so callers can match on a single enum regardless of which
/// subsystem raised it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("backup error: {0}")]
    Backup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
