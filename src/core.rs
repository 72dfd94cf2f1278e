//! `Core`: the composition root wiring the storage engine, registry,
//! verification engine, ingest, query API, emission bus, and scheduled
//! maintenance into a single running instance.

use std::sync::Arc;

use tokio::{sync::Notify, task::JoinHandle, time::timeout};
use tracing::{error, info, warn};

use crate::{
    config::Config,
    events::{EmissionBus, Event, EventKind, EventReceiver, SeverityLevel},
    ingest::Ingest,
    query::Query,
    registry::Registry,
    scheduler,
    storage::Storage,
    verification::VerificationEngine,
    Error,
};

/// A fully wired, running instance. Dropping this value does not stop the
/// background scheduler — call [`Core::shutdown`] for a graceful stop.
pub struct Core {
    pub storage: Storage,
    pub bus: EmissionBus,
    pub registry: Registry,
    pub verification: VerificationEngine,
    pub ingest: Ingest,
    pub query: Query,
    stop: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_grace: std::time::Duration,
}

impl Core {
    /// Opens the datastore at `config.state_dir`, wires every component
    /// together, and spawns the scheduled maintenance tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the datastore cannot be opened or migrated.
    pub fn start(config: &Config) -> Result<Self, Error> {
        let storage = Storage::open(&config.state_dir, config.pool_size, config.query_timeout)?;
        let storage = storage.with_backup_retention(
            config.retention.backup_retention_days,
            config.retention.max_backup_count,
        );
        Self::validate_startup(config, &storage)?;
        let bus = EmissionBus::new(storage.clone(), config.emission.subscriber_queue_depth);
        let registry = Registry::new(storage.clone(), bus.clone(), config.registry.clone());
        let verification =
            VerificationEngine::new(storage.clone(), bus.clone(), config.verification.cache_ttl);
        let ingest = Ingest::new(storage.clone(), bus.clone());
        let query = Query::new(storage.clone(), bus.clone());

        let stop = Arc::new(Notify::new());
        let tasks = scheduler::spawn_all(
            storage.clone(),
            registry.clone(),
            verification.clone(),
            bus.clone(),
            config.scheduling.clone(),
            config.retention.heartbeat_retention_days,
            Arc::clone(&stop),
        );

        info!(state_dir = %config.state_dir.display(), "godpack-core started");
        Ok(Self {
            storage,
            bus,
            registry,
            verification,
            ingest,
            query,
            stop,
            tasks,
            shutdown_grace: config.scheduling.shutdown_grace,
        })
    }

    /// Startup sanity checks run once before the scheduler is spawned
    /// (`SPEC_FULL.md` §10): the schema is current, the pool is usable, and
    /// the backup directory accepts writes. Any failure is CRITICAL and
    /// aborts startup; the `godpack-cored` binary maps a stale schema
    /// (`Error::Migration`, spec §6) to exit code 3 and every other failure
    /// here to exit code 2.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first failed check.
    fn validate_startup(config: &Config, storage: &Storage) -> Result<(), Error> {
        if crate::db::migration::has_pending_migrations(storage.pool())? {
            error!("schema version does not match the latest migration");
            return Err(Error::Migration("pending migrations were not applied".into()));
        }

        if config.pool_size < 1 {
            error!(pool_size = config.pool_size, "configured pool_size must be at least 1");
            return Err(Error::Config("pool_size must be at least 1".into()));
        }

        let probe = storage.backups().root().join(".startup-write-check");
        std::fs::write(&probe, b"ok").map_err(|e| {
            error!(error = %e, "backup directory is not writable");
            Error::Io(e)
        })?;
        let _ = std::fs::remove_file(&probe);

        Ok(())
    }

    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.bus.subscribe()
    }

    /// Signals every scheduled task to run its shutdown pass and stop, then
    /// waits up to the configured grace period for them to finish.
    pub async fn shutdown(self) {
        let _ = self.bus.publish(Event {
            kind: EventKind::DatabaseShutdown,
            severity: SeverityLevel::Info,
            payload: serde_json::json!({}),
            actor_worker_id: None,
        });
        self.stop.notify_waiters();

        let joined = timeout(self.shutdown_grace, futures_join_all(self.tasks)).await;
        if joined.is_err() {
            warn!("scheduled tasks did not finish within the shutdown grace period");
        }
    }
}

async fn futures_join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        let _ = task.await;
    }
}
