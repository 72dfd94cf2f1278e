//! Layered configuration: built-in defaults, overridden by an optional TOML
//! file, overridden by `GODPACK_`-prefixed environment variables.

use std::{env, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub pool_size: u32,
    pub query_timeout: Duration,
    pub retention: RetentionConfig,
    pub registry: RegistryConfig,
    pub verification: VerificationConfig,
    pub scheduling: SchedulingConfig,
    pub emission: EmissionConfig,
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub backup_retention_days: i64,
    pub max_backup_count: usize,
    pub heartbeat_retention_days: i64,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub leech_enabled: bool,
    pub leech_min_gp: i64,
    pub leech_min_packs: i64,
    pub inactive_after: Duration,
    pub heartbeat_rate: Duration,
    pub inactive_instance_count: i64,
    pub inactive_ppm_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct SchedulingConfig {
    pub expiration_scan_interval: Duration,
    pub expiration_warning_threshold: Duration,
    pub stats_snapshot_interval: Duration,
    pub worker_cleanup_interval: Duration,
    pub backup_interval: Duration,
    pub enhanced_cleanup_interval: Duration,
    pub daily_sync_interval: Duration,
    pub shutdown_grace: Duration,
    /// The hour-of-day (0-23) GodPack `expires_at` resets against (spec
    /// §3/§6); UTC, since the crate carries no timezone database.
    pub daily_reset_local_hour: u32,
}

#[derive(Debug, Clone)]
pub struct EmissionConfig {
    pub subscriber_queue_depth: usize,
}

impl Config {
    const DEFAULT_POOL_SIZE: u32 = 10;
    const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 5;

    /// Reads configuration from the given TOML file (if any), layered over
    /// built-in defaults and `GODPACK_`-prefixed environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is given but cannot be parsed, or if a
    /// required default (e.g. the current working directory) cannot be
    /// resolved.
    pub fn load(path: Option<&str>) -> Result<Self, Error> {
        let cwd = env::current_dir().map_err(Error::Io)?;
        let builder = config::Config::builder()
            .set_default("state_dir", cwd.join("data").to_string_lossy().into_owned())
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("pool_size", i64::from(Self::DEFAULT_POOL_SIZE))
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("query_timeout_secs", Self::DEFAULT_QUERY_TIMEOUT_SECS as i64)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("retention.backup_retention_days", 30)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("retention.max_backup_count", 50)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("retention.heartbeat_retention_days", 30)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("registry.leech_enabled", false)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("registry.leech_min_gp", 10)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("registry.leech_min_packs", 10_000)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("registry.inactive_after_secs", 61 * 60)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("registry.heartbeat_rate_secs", 30 * 60)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("registry.inactive_instance_count", 0)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("registry.inactive_ppm_threshold", 0.1)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("verification.cache_ttl_secs", 5 * 60)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("scheduling.expiration_scan_interval_secs", 5 * 60)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("scheduling.expiration_warning_threshold_secs", 6 * 60 * 60)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("scheduling.stats_snapshot_interval_secs", 30 * 60)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("scheduling.worker_cleanup_interval_secs", 24 * 60 * 60)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("scheduling.backup_interval_secs", 6 * 60 * 60)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("scheduling.enhanced_cleanup_interval_secs", 6 * 60 * 60)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("scheduling.daily_sync_interval_secs", 24 * 60 * 60)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("scheduling.shutdown_grace_secs", 10)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("scheduling.daily_reset_local_hour", 6)
            .map_err(|e| Error::Config(e.to_string()))?
            .set_default("emission.subscriber_queue_depth", 256)
            .map_err(|e| Error::Config(e.to_string()))?
            .add_source(config::Environment::with_prefix("GODPACK").separator("__"));

        let builder = if let Some(path) = path {
            builder.add_source(config::File::with_name(path))
        } else {
            builder
        };

        let parsed: ConfigParser = builder
            .build()
            .map_err(|e| Error::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(parsed.into())
    }
}

#[derive(Debug, Deserialize)]
struct ConfigParser {
    state_dir: PathBuf,
    pool_size: u32,
    query_timeout_secs: u64,
    retention: RetentionParser,
    registry: RegistryParser,
    verification: VerificationParser,
    scheduling: SchedulingParser,
    emission: EmissionParser,
}

#[derive(Debug, Deserialize)]
struct RetentionParser {
    backup_retention_days: i64,
    max_backup_count: usize,
    heartbeat_retention_days: i64,
}

#[derive(Debug, Deserialize)]
struct RegistryParser {
    leech_enabled: bool,
    leech_min_gp: i64,
    leech_min_packs: i64,
    inactive_after_secs: u64,
    heartbeat_rate_secs: u64,
    inactive_instance_count: i64,
    inactive_ppm_threshold: f64,
}

#[derive(Debug, Deserialize)]
struct VerificationParser {
    cache_ttl_secs: u64,
}

#[derive(Debug, Deserialize)]
struct SchedulingParser {
    expiration_scan_interval_secs: u64,
    expiration_warning_threshold_secs: u64,
    stats_snapshot_interval_secs: u64,
    worker_cleanup_interval_secs: u64,
    backup_interval_secs: u64,
    enhanced_cleanup_interval_secs: u64,
    daily_sync_interval_secs: u64,
    shutdown_grace_secs: u64,
    daily_reset_local_hour: u32,
}

#[derive(Debug, Deserialize)]
struct EmissionParser {
    subscriber_queue_depth: usize,
}

impl From<ConfigParser> for Config {
    fn from(p: ConfigParser) -> Self {
        Self {
            state_dir: p.state_dir,
            pool_size: p.pool_size,
            query_timeout: Duration::from_secs(p.query_timeout_secs),
            retention: RetentionConfig {
                backup_retention_days: p.retention.backup_retention_days,
                max_backup_count: p.retention.max_backup_count,
                heartbeat_retention_days: p.retention.heartbeat_retention_days,
            },
            registry: RegistryConfig {
                leech_enabled: p.registry.leech_enabled,
                leech_min_gp: p.registry.leech_min_gp,
                leech_min_packs: p.registry.leech_min_packs,
                inactive_after: Duration::from_secs(p.registry.inactive_after_secs),
                heartbeat_rate: Duration::from_secs(p.registry.heartbeat_rate_secs),
                inactive_instance_count: p.registry.inactive_instance_count,
                inactive_ppm_threshold: p.registry.inactive_ppm_threshold,
            },
            verification: VerificationConfig {
                cache_ttl: Duration::from_secs(p.verification.cache_ttl_secs),
            },
            scheduling: SchedulingConfig {
                expiration_scan_interval: Duration::from_secs(
                    p.scheduling.expiration_scan_interval_secs,
                ),
                expiration_warning_threshold: Duration::from_secs(
                    p.scheduling.expiration_warning_threshold_secs,
                ),
                stats_snapshot_interval: Duration::from_secs(
                    p.scheduling.stats_snapshot_interval_secs,
                ),
                worker_cleanup_interval: Duration::from_secs(
                    p.scheduling.worker_cleanup_interval_secs,
                ),
                backup_interval: Duration::from_secs(p.scheduling.backup_interval_secs),
                enhanced_cleanup_interval: Duration::from_secs(
                    p.scheduling.enhanced_cleanup_interval_secs,
                ),
                daily_sync_interval: Duration::from_secs(p.scheduling.daily_sync_interval_secs),
                shutdown_grace: Duration::from_secs(p.scheduling.shutdown_grace_secs),
                daily_reset_local_hour: p.scheduling.daily_reset_local_hour,
            },
            emission: EmissionConfig {
                subscriber_queue_depth: p.emission.subscriber_queue_depth,
            },
        }
    }
}
