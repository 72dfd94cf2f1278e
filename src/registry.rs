//! The worker registry (spec §4.3): status transitions, the sorted-view
//! ranking (status priority then packs-per-minute) underlying the active
//! set, and the aggregated real-instance count workers are ranked by.

use std::time::Duration;

use chrono::Utc;

use crate::{
    config::RegistryConfig,
    events::{EmissionBus, Event, EventKind, SeverityLevel},
    models::{Worker, WorkerStatus},
    storage::Storage,
    Error,
};

/// A worker's real instance count: the sum of subsystem instance counts
/// heartbeated within the inactivity window, rather than the raw value
/// reported in a single stale heartbeat.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceSummary {
    pub real_instances: i64,
    pub subsystem_count: usize,
}

/// A worker's position in spec §4.3's sorted-view tie-break: the literal
/// statuses plus the derived `waiting` state (still `ACTIVE` in storage,
/// but overdue for its next heartbeat).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ViewStatus {
    Active,
    Farm,
    Leech,
    Waiting,
    Inactive,
}

impl ViewStatus {
    fn priority(self) -> u8 {
        match self {
            ViewStatus::Active => 0,
            ViewStatus::Farm => 1,
            ViewStatus::Leech => 2,
            ViewStatus::Waiting => 3,
            ViewStatus::Inactive => 4,
        }
    }
}

/// One row of [`Registry::sorted_view`]: a worker annotated with its
/// display status and most recent packs-per-minute, the two components of
/// spec §4.3's tie-break order.
#[derive(Debug, Clone)]
pub struct RankedWorker {
    pub worker: Worker,
    pub view_status: ViewStatus,
    pub packs_per_min: f64,
}

#[derive(Clone)]
pub struct Registry {
    storage: Storage,
    bus: EmissionBus,
    config: RegistryConfig,
}

impl Registry {
    #[must_use]
    pub fn new(storage: Storage, bus: EmissionBus, config: RegistryConfig) -> Self {
        Self { storage, bus, config }
    }

    /// Computes the real instance count for `worker_id` from subsystems
    /// heartbeated within the configured inactivity window.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn real_instance_count(&self, worker_id: i64) -> Result<InstanceSummary, Error> {
        let since = (Utc::now() - chrono_duration(self.config.inactive_after)).naive_utc();
        let subsystems = self.storage.list_active_subsystems(worker_id, since)?;
        Ok(InstanceSummary {
            real_instances: subsystems.iter().map(|s| i64::from(s.instances_online)).sum(),
            subsystem_count: subsystems.len(),
        })
    }

    /// Ranks every worker per spec §4.3's sorted-view tie-break: status
    /// priority `active < farm < leech < waiting < inactive`, then
    /// descending `packs_per_min` (the latest run's packs-per-minute, or
    /// `0.0` with no run in the trailing day). `ACTIVE` workers overdue for
    /// a heartbeat by more than `HeartbeatRate+1` minutes, but not yet past
    /// `InactiveTime`, are displayed as the derived `waiting` status.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn sorted_view(&self) -> Result<Vec<RankedWorker>, Error> {
        let now = Utc::now().naive_utc();
        let refresh_cutoff =
            now - chrono_duration(self.config.heartbeat_rate) - chrono::Duration::minutes(1);
        let inactive_cutoff = now - chrono_duration(self.config.inactive_after);
        let run_window = now - chrono::Duration::days(1);

        let mut ranked = Vec::new();
        for worker in self.storage.list_all_workers()? {
            let view_status = match worker.status() {
                WorkerStatus::Active => match worker.last_heartbeat_ts {
                    Some(ts) if ts >= refresh_cutoff => ViewStatus::Active,
                    Some(ts) if ts >= inactive_cutoff => ViewStatus::Waiting,
                    _ => ViewStatus::Inactive,
                },
                WorkerStatus::Farm => ViewStatus::Farm,
                WorkerStatus::Leech => ViewStatus::Leech,
                WorkerStatus::Inactive | WorkerStatus::Banned | WorkerStatus::Premium => {
                    ViewStatus::Inactive
                }
            };

            let packs_per_min = self
                .storage
                .list_runs_since(worker.worker_id, run_window)?
                .iter()
                .max_by_key(|r| r.start_ts)
                .map_or(0.0, |r| r.packs_per_minute);

            ranked.push(RankedWorker { worker, view_status, packs_per_min });
        }

        ranked.sort_by(|a, b| {
            a.view_status
                .priority()
                .cmp(&b.view_status.priority())
                .then_with(|| {
                    b.packs_per_min
                        .partial_cmp(&a.packs_per_min)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        Ok(ranked)
    }

    /// The `ACTIVE` subset of [`Registry::sorted_view`], in the same
    /// descending-`packs_per_min` order.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub fn active_set(&self) -> Result<Vec<Worker>, Error> {
        Ok(self
            .sorted_view()?
            .into_iter()
            .filter(|r| r.view_status == ViewStatus::Active)
            .map(|r| r.worker)
            .collect())
    }

    /// Transitions a worker's status, delegating the guard checks named in
    /// spec §4.3's state table to [`Storage::set_worker_status`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transition's guard is not satisfied.
    pub fn set_status(&self, worker_id: i64, status: WorkerStatus) -> Result<(), Error> {
        self.storage.set_worker_status(
            worker_id,
            status,
            self.config.leech_min_gp,
            self.config.leech_min_packs,
            self.config.leech_enabled,
        )?;
        self.bus.publish(Event {
            kind: EventKind::WorkerStatusChanged,
            severity: SeverityLevel::Info,
            payload: serde_json::json!({ "worker_id": worker_id, "status": status.to_string() }),
            actor_worker_id: Some(worker_id),
        })?;
        Ok(())
    }

    /// Auto-kicks every `ACTIVE` worker matching one of spec §4.3's three
    /// demotion triggers, demoting it to `INACTIVE`: no heartbeat within
    /// `InactiveTime`; or, past the shorter `HeartbeatRate+1` refresh
    /// window, an observed instance count at or below
    /// `InactiveInstanceCount`; or a packs-per-minute between 0 (exclusive)
    /// and `InactivePPM`. Returns the ids of the workers it kicked.
    ///
    /// # Errors
    ///
    /// Returns an error if an underlying read or write fails.
    pub fn auto_kick_inactive(&self) -> Result<Vec<i64>, Error> {
        let now = Utc::now().naive_utc();
        let inactive_cutoff = now - chrono_duration(self.config.inactive_after);
        let refresh_cutoff =
            now - chrono_duration(self.config.heartbeat_rate) - chrono::Duration::minutes(1);

        let mut kicked = Vec::new();
        for worker in self.storage.list_workers_by_status(WorkerStatus::Active)? {
            let reason = self.kick_reason(&worker, inactive_cutoff, refresh_cutoff)?;
            let Some(reason) = reason else { continue };

            self.storage.set_worker_status(
                worker.worker_id,
                WorkerStatus::Inactive,
                self.config.leech_min_gp,
                self.config.leech_min_packs,
                self.config.leech_enabled,
            )?;
            self.bus.publish(Event {
                kind: EventKind::WorkerStatusChanged,
                severity: SeverityLevel::Warn,
                payload: serde_json::json!({
                    "worker_id": worker.worker_id,
                    "status": "inactive",
                    "reason": reason,
                }),
                actor_worker_id: Some(worker.worker_id),
            })?;
            kicked.push(worker.worker_id);
        }
        Ok(kicked)
    }

    fn kick_reason(
        &self,
        worker: &Worker,
        inactive_cutoff: chrono::NaiveDateTime,
        refresh_cutoff: chrono::NaiveDateTime,
    ) -> Result<Option<&'static str>, Error> {
        let Some(last_heartbeat_ts) = worker.last_heartbeat_ts else {
            return Ok(Some("never_heartbeated"));
        };
        if last_heartbeat_ts < inactive_cutoff {
            return Ok(Some("inactive_timeout"));
        }
        if last_heartbeat_ts >= refresh_cutoff {
            return Ok(None);
        }

        let recent = self
            .storage
            .recent_heartbeats(worker.worker_id, refresh_cutoff - chrono::Duration::days(1))?;
        let Some(latest) = recent.first() else {
            return Ok(None);
        };
        if i64::from(latest.instances_online) <= self.config.inactive_instance_count {
            return Ok(Some("low_instance_count"));
        }
        if let Some(prev) = recent.get(1) {
            let minutes = (latest.ts - prev.ts).num_minutes().max(1) as f64;
            let ppm = (latest.packs_cumulative - prev.packs_cumulative) as f64 / minutes;
            if ppm > 0.0 && ppm < self.config.inactive_ppm_threshold {
                return Ok(Some("low_packs_per_minute"));
            }
        }
        Ok(None)
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::NewHeartbeat, schema::workers};
    use diesel::prelude::*;

    fn registry_with(config: RegistryConfig) -> (Registry, Storage) {
        let dir = tempfile::tempdir().unwrap().keep();
        let storage = Storage::open(&dir, 5, Duration::from_secs(5)).unwrap();
        let bus = EmissionBus::new(storage.clone(), 16);
        (Registry::new(storage.clone(), bus, config), storage)
    }

    fn default_config() -> RegistryConfig {
        RegistryConfig {
            leech_enabled: false,
            leech_min_gp: 10,
            leech_min_packs: 10_000,
            inactive_after: Duration::from_secs(61 * 60),
            heartbeat_rate: Duration::from_secs(30 * 60),
            inactive_instance_count: 0,
            inactive_ppm_threshold: 0.1,
        }
    }

    /// Directly marks a worker `ACTIVE` with `last_heartbeat_ts`, bypassing
    /// the `player_id` guard on [`Storage::set_worker_status`] — this is a
    /// fixture helper, not a supported API path.
    fn force_active(storage: &Storage, worker_id: i64, last_heartbeat_ts: chrono::NaiveDateTime) {
        storage.ensure_worker(worker_id).unwrap();
        let mut conn = storage.pool().get().unwrap();
        diesel::update(workers::table.find(worker_id))
            .set((
                workers::player_id.eq(Some("p1")),
                workers::status.eq(WorkerStatus::Active.to_string()),
                workers::last_heartbeat_ts.eq(last_heartbeat_ts),
            ))
            .execute(&mut *conn)
            .unwrap();
    }

    #[test]
    fn fresh_heartbeat_is_not_kicked() {
        let (registry, storage) = registry_with(default_config());
        force_active(&storage, 1, Utc::now().naive_utc());
        let kicked = registry.auto_kick_inactive().unwrap();
        assert!(kicked.is_empty());
        assert_eq!(storage.get_worker(1).unwrap().unwrap().status(), WorkerStatus::Active);
    }

    #[test]
    fn stale_past_inactive_time_is_kicked() {
        let (registry, storage) = registry_with(default_config());
        let stale = Utc::now().naive_utc() - chrono::Duration::hours(2);
        force_active(&storage, 7, stale);
        let kicked = registry.auto_kick_inactive().unwrap();
        assert_eq!(kicked, vec![7]);
        assert_eq!(storage.get_worker(7).unwrap().unwrap().status(), WorkerStatus::Inactive);
    }

    #[test]
    fn low_instance_count_inside_refresh_window_is_kicked() {
        let config = default_config();
        let (registry, storage) = registry_with(config.clone());
        // Past the HeartbeatRate+1 refresh window but within InactiveTime.
        let ts = Utc::now().naive_utc() - chrono::Duration::minutes(35);
        force_active(&storage, 9, ts);
        storage
            .insert_heartbeat(&NewHeartbeat {
                message_id: "m1",
                worker_id: 9,
                ts,
                instances_online: 0,
                instances_offline: 0,
                time_running_minutes: 10,
                packs_cumulative: 100,
                main_active: true,
                selected_packs: "[]",
            })
            .unwrap();

        let kicked = registry.auto_kick_inactive().unwrap();
        assert_eq!(kicked, vec![9]);
    }

    #[test]
    fn low_packs_per_minute_between_two_heartbeats_is_kicked() {
        let config = default_config();
        let (registry, storage) = registry_with(config.clone());
        let older = Utc::now().naive_utc() - chrono::Duration::minutes(55);
        let newer = Utc::now().naive_utc() - chrono::Duration::minutes(35);
        force_active(&storage, 11, newer);

        storage
            .insert_heartbeat(&NewHeartbeat {
                message_id: "m-older",
                worker_id: 11,
                ts: older,
                instances_online: 5,
                instances_offline: 0,
                time_running_minutes: 5,
                packs_cumulative: 1000,
                main_active: true,
                selected_packs: "[]",
            })
            .unwrap();
        storage
            .insert_heartbeat(&NewHeartbeat {
                message_id: "m-newer",
                worker_id: 11,
                ts: newer,
                instances_online: 5,
                instances_offline: 0,
                time_running_minutes: 10,
                packs_cumulative: 1001,
                main_active: true,
                selected_packs: "[]",
            })
            .unwrap();

        let kicked = registry.auto_kick_inactive().unwrap();
        assert_eq!(kicked, vec![11]);
    }

    #[test]
    fn never_heartbeated_worker_is_kicked() {
        let (registry, storage) = registry_with(default_config());
        storage.ensure_worker(21).unwrap();
        let mut conn = storage.pool().get().unwrap();
        diesel::update(workers::table.find(21))
            .set((workers::player_id.eq(Some("p1")), workers::status.eq(WorkerStatus::Active.to_string())))
            .execute(&mut *conn)
            .unwrap();
        drop(conn);

        let kicked = registry.auto_kick_inactive().unwrap();
        assert_eq!(kicked, vec![21]);
    }
}
