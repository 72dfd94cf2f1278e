//! Emission bus: a typed fan-out of system events to interested subscribers
//! (spec §4.7). Every subscriber gets its own bounded queue; a slow
//! subscriber drops its oldest unread event rather than back-pressuring the
//! publisher, and logs a `WARN` system event when it does.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::warn;

use crate::{
    models::{NewSystemEvent, Severity},
    storage::Storage,
};

/// The kind of change an [`Event`] reports, mirroring the `event_type`
/// column of `system_events`. Variant names follow this crate's entity
/// vocabulary (`Worker`/`GodPack`); [`EventKind::as_str`] maps them onto the
/// wire names of spec §6's observable-events list, which predates that
/// vocabulary and still says `USER_*`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum EventKind {
    WorkerAdded,
    WorkerStatusChanged,
    /// Reserved: spec §3 says workers are never destroyed, only marked
    /// `INACTIVE`, so nothing in this crate currently publishes this kind.
    WorkerDeleted,
    HeartbeatAccepted,
    GodPackAdded,
    GodPackStateChanged,
    GodPackRatioChanged,
    /// Reserved: spec §3 says a GodPack is never deleted while referenced
    /// by test results, so nothing in this crate currently publishes this
    /// kind.
    GodPackDeleted,
    TestResultAdded,
    ExpirationWarningSent,
    DatabaseVacuum,
    DatabaseAnalyze,
    DatabaseOptimize,
    /// Reserved for an operator-driven restore path; [`crate::db::BackupManager::restore`]
    /// is not currently wired to a running-service operation.
    DatabaseRestored,
    DataCleanup,
    DataExport,
    DataImport,
    BackupCreated,
    MigrationApplied,
    DatabaseShutdown,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::WorkerAdded => "USER_ADDED",
            EventKind::WorkerStatusChanged => "USER_STATUS_CHANGED",
            EventKind::WorkerDeleted => "USER_DELETED",
            EventKind::HeartbeatAccepted => "HEARTBEAT_ACCEPTED",
            EventKind::GodPackAdded => "GODPACK_ADDED",
            EventKind::GodPackStateChanged => "GODPACK_STATE_CHANGED",
            EventKind::GodPackRatioChanged => "GODPACK_RATIO_CHANGED",
            EventKind::GodPackDeleted => "GODPACK_DELETED",
            EventKind::TestResultAdded => "TEST_RESULT_ADDED",
            EventKind::ExpirationWarningSent => "EXPIRATION_WARNING_SENT",
            EventKind::DatabaseVacuum => "DATABASE_VACUUM",
            EventKind::DatabaseAnalyze => "DATABASE_ANALYZE",
            EventKind::DatabaseOptimize => "DATABASE_OPTIMIZE",
            EventKind::DatabaseRestored => "DATABASE_RESTORED",
            EventKind::DataCleanup => "DATA_CLEANUP",
            EventKind::DataExport => "DATA_EXPORT",
            EventKind::DataImport => "DATA_IMPORT",
            EventKind::BackupCreated => "BACKUP_CREATED",
            EventKind::MigrationApplied => "MIGRATION_APPLIED",
            EventKind::DatabaseShutdown => "DATABASE_SHUTDOWN",
        }
    }
}

/// A single emitted event, delivered verbatim to every subscriber.
#[derive(Clone, Debug, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub severity: SeverityLevel,
    pub payload: serde_json::Value,
    pub actor_worker_id: Option<i64>,
}

/// Mirrors [`crate::models::Severity`] at the bus boundary so callers of
/// this module don't need to depend on the storage layer's model types.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum SeverityLevel {
    Info,
    Warn,
    Critical,
}

impl From<SeverityLevel> for Severity {
    fn from(level: SeverityLevel) -> Self {
        match level {
            SeverityLevel::Info => Severity::Info,
            SeverityLevel::Warn => Severity::Warn,
            SeverityLevel::Critical => Severity::Critical,
        }
    }
}

struct Inbox {
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
}

/// The receiving half handed back by [`EmissionBus::subscribe`].
pub struct EventReceiver {
    inbox: Arc<Inbox>,
}

impl EventReceiver {
    /// Waits for and returns the next event, or `None` once the bus itself
    /// has been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self
                .inbox
                .queue
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front()
            {
                return Some(event);
            }
            if Arc::strong_count(&self.inbox) == 1 {
                return None;
            }
            self.inbox.notify.notified().await;
        }
    }
}

/// Publishes [`Event`]s both to the durable `system_events` audit log and to
/// any live subscribers registered via [`EmissionBus::subscribe`].
#[derive(Clone)]
pub struct EmissionBus {
    storage: Storage,
    queue_depth: usize,
    subscribers: Arc<Mutex<Vec<Arc<Inbox>>>>,
}

impl EmissionBus {
    #[must_use]
    pub fn new(storage: Storage, queue_depth: usize) -> Self {
        Self {
            storage,
            queue_depth: queue_depth.max(1),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers a new subscriber and returns its receiving end.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        let inbox = Arc::new(Inbox {
            queue: Mutex::new(VecDeque::with_capacity(self.queue_depth)),
            notify: Notify::new(),
            capacity: self.queue_depth,
        });
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Arc::clone(&inbox));
        EventReceiver { inbox }
    }

    /// Writes `event` to the audit log and fans it out to every live
    /// subscriber. A subscriber whose queue is already at capacity has its
    /// oldest unread event evicted to make room; this is reported as a
    /// `WARN` system event rather than blocking the publisher.
    ///
    /// # Errors
    ///
    /// Returns an error if the audit-log write fails.
    pub fn publish(&self, event: Event) -> Result<(), crate::Error> {
        self.storage.insert_system_event(&NewSystemEvent {
            event_type: event.kind.as_str(),
            severity: Severity::from(event.severity).to_string().as_str(),
            payload: &event.payload.to_string(),
            actor_worker_id: event.actor_worker_id,
            ts: Utc::now().naive_utc(),
        })?;

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        subscribers.retain(|inbox| Arc::strong_count(inbox) > 1);

        let mut overflowed = false;
        for inbox in subscribers.iter() {
            let mut queue = inbox
                .queue
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if queue.len() >= inbox.capacity {
                queue.pop_front();
                overflowed = true;
            }
            queue.push_back(event.clone());
            drop(queue);
            inbox.notify.notify_one();
        }
        drop(subscribers);

        if overflowed {
            warn!(kind = event.kind.as_str(), "subscriber queue saturated, dropped oldest event");
            self.storage.insert_system_event(&NewSystemEvent {
                event_type: "SUBSCRIBER_QUEUE_SATURATED",
                severity: Severity::Warn.to_string().as_str(),
                payload: &serde_json::json!({ "kind": event.kind.as_str() }).to_string(),
                actor_worker_id: None,
                ts: Utc::now().naive_utc(),
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn storage() -> Storage {
        let dir = tempfile::tempdir().unwrap().keep();
        Storage::open(&dir, 5, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EmissionBus::new(storage(), 4);
        let mut rx = bus.subscribe();
        bus.publish(Event {
            kind: EventKind::WorkerAdded,
            severity: SeverityLevel::Info,
            payload: serde_json::json!({ "worker_id": 1 }),
            actor_worker_id: Some(1),
        })
        .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::WorkerAdded);
    }

    #[tokio::test]
    async fn full_queue_drops_oldest() {
        let bus = EmissionBus::new(storage(), 1);
        let mut rx = bus.subscribe();
        for i in 0..3 {
            bus.publish(Event {
                kind: EventKind::HeartbeatAccepted,
                severity: SeverityLevel::Info,
                payload: serde_json::json!({ "seq": i }),
                actor_worker_id: None,
            })
            .unwrap();
        }
        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload, serde_json::json!({ "seq": 2 }));
    }
}
