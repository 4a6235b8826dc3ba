//! Runtime configuration for vr-iosched.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! The scheduler tunables live here, together with the named get/set surface
//! used to adjust them while requests are queued.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sched::request::{Direction, SyncClass};

/// Largest value any tunable can hold.
pub const TUNABLE_MAX: i64 = i32::MAX as i64;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "vr-iosched", about = "Replay a block I/O trace through the V(R) scheduler")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "vr-iosched.json")]
    pub config: PathBuf,

    /// Path to the request trace (JSON array of submissions).
    #[arg(short, long)]
    pub trace: PathBuf,

    /// Tunable override, e.g. `--set rev_penalty=1`. May be repeated.
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub overrides: Vec<String>,

    /// Print the dispatch log as JSON.
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunableError {
    #[error("Unknown tunable: {0}")]
    Unknown(String),

    #[error("Malformed tunable assignment {0:?} (expected NAME=VALUE)")]
    Malformed(String),

    #[error("Invalid value {value:?} for tunable {name}")]
    InvalidValue { name: String, value: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler tunables.
    pub scheduler: SchedulerConfig,

    /// Simulated device used by trace replay.
    pub device: DeviceConfig,
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let mut config: Config = serde_json::from_str(&data)?;
            config.scheduler = config.scheduler.sanitized();
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}

/// Scheduler tunables. Expire intervals are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Max residency of a sync read before forced dispatch.
    pub sync_read_expire: u64,

    /// Max residency of a sync write before forced dispatch.
    pub sync_write_expire: u64,

    /// Max residency of an async read. Soft: only checked at queue heads.
    pub async_read_expire: u64,

    /// Max residency of an async write. Soft: only checked at queue heads.
    pub async_write_expire: u64,

    /// Consecutive same-direction dispatches that make up one batch.
    pub fifo_batch: u64,

    /// Read batches allowed to pass while writes wait.
    pub writes_starved: u64,

    /// Cost multiplier for reversing the head. 0 = SCAN, 1 = SSTF.
    pub rev_penalty: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_read_expire: 500,
            sync_write_expire: 2_000,
            async_read_expire: 4_000,
            async_write_expire: 16_000,
            fifo_batch: 8,
            writes_starved: 2,
            rev_penalty: 10,
        }
    }
}

impl SchedulerConfig {
    /// Expire interval for a request class.
    pub fn expire_for(&self, dir: Direction, sync: SyncClass) -> u64 {
        match (dir, sync) {
            (Direction::Read, SyncClass::Sync) => self.sync_read_expire,
            (Direction::Write, SyncClass::Sync) => self.sync_write_expire,
            (Direction::Read, SyncClass::Async) => self.async_read_expire,
            (Direction::Write, SyncClass::Async) => self.async_write_expire,
        }
    }

    /// Read a tunable.
    pub fn get(&self, tunable: Tunable) -> i64 {
        let value = *self.field(tunable);
        // Stored values never exceed TUNABLE_MAX once set through `set` or `sanitized`.
        i64::try_from(value).unwrap_or(TUNABLE_MAX)
    }

    /// Write a tunable, clamping into `[0, TUNABLE_MAX]`. Returns the stored value.
    pub fn set(&mut self, tunable: Tunable, value: i64) -> i64 {
        let clamped = value.clamp(0, TUNABLE_MAX);
        if clamped != value {
            tracing::warn!(tunable = %tunable, requested = value, stored = clamped, "Tunable clamped");
        }
        *self.field_mut(tunable) = clamped as u64;
        clamped
    }

    /// Apply a `name=value` assignment, as given on the command line.
    pub fn apply_assignment(&mut self, assignment: &str) -> Result<(Tunable, i64), TunableError> {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| TunableError::Malformed(assignment.to_string()))?;
        let tunable: Tunable = name.trim().parse()?;
        let value: i64 = value.trim().parse().map_err(|_| TunableError::InvalidValue {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
        })?;
        Ok((tunable, self.set(tunable, value)))
    }

    /// Clamp every tunable into range (for configs that bypassed `set`).
    pub fn sanitized(mut self) -> Self {
        for tunable in Tunable::ALL {
            let raw = *self.field(tunable);
            if raw > TUNABLE_MAX as u64 {
                tracing::warn!(tunable = %tunable, requested = raw, stored = TUNABLE_MAX, "Tunable clamped");
                *self.field_mut(tunable) = TUNABLE_MAX as u64;
            }
        }
        self
    }

    fn field(&self, tunable: Tunable) -> &u64 {
        match tunable {
            Tunable::SyncReadExpire => &self.sync_read_expire,
            Tunable::SyncWriteExpire => &self.sync_write_expire,
            Tunable::AsyncReadExpire => &self.async_read_expire,
            Tunable::AsyncWriteExpire => &self.async_write_expire,
            Tunable::FifoBatch => &self.fifo_batch,
            Tunable::WritesStarved => &self.writes_starved,
            Tunable::RevPenalty => &self.rev_penalty,
        }
    }

    fn field_mut(&mut self, tunable: Tunable) -> &mut u64 {
        match tunable {
            Tunable::SyncReadExpire => &mut self.sync_read_expire,
            Tunable::SyncWriteExpire => &mut self.sync_write_expire,
            Tunable::AsyncReadExpire => &mut self.async_read_expire,
            Tunable::AsyncWriteExpire => &mut self.async_write_expire,
            Tunable::FifoBatch => &mut self.fifo_batch,
            Tunable::WritesStarved => &mut self.writes_starved,
            Tunable::RevPenalty => &mut self.rev_penalty,
        }
    }
}

/// Named scheduler tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tunable {
    SyncReadExpire,
    SyncWriteExpire,
    AsyncReadExpire,
    AsyncWriteExpire,
    FifoBatch,
    WritesStarved,
    RevPenalty,
}

impl Tunable {
    pub const ALL: [Tunable; 7] = [
        Tunable::SyncReadExpire,
        Tunable::SyncWriteExpire,
        Tunable::AsyncReadExpire,
        Tunable::AsyncWriteExpire,
        Tunable::FifoBatch,
        Tunable::WritesStarved,
        Tunable::RevPenalty,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tunable::SyncReadExpire => "sync_read_expire",
            Tunable::SyncWriteExpire => "sync_write_expire",
            Tunable::AsyncReadExpire => "async_read_expire",
            Tunable::AsyncWriteExpire => "async_write_expire",
            Tunable::FifoBatch => "fifo_batch",
            Tunable::WritesStarved => "writes_starved",
            Tunable::RevPenalty => "rev_penalty",
        }
    }
}

impl std::fmt::Display for Tunable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tunable {
    type Err = TunableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tunable::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| TunableError::Unknown(s.to_string()))
    }
}

/// Simulated device timing for trace replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Fixed cost of servicing one request.
    pub service_time_ms: u64,

    /// Additional cost per 1000 sectors of head travel.
    pub ms_per_1k_sectors_seek: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            service_time_ms: 4,
            ms_per_1k_sectors_seek: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.get(Tunable::SyncReadExpire), 500);
        assert_eq!(cfg.get(Tunable::AsyncWriteExpire), 16_000);
        assert_eq!(cfg.get(Tunable::FifoBatch), 8);
        assert_eq!(cfg.get(Tunable::WritesStarved), 2);
        assert_eq!(cfg.expire_for(Direction::Write, SyncClass::Sync), 2_000);
    }

    #[test]
    fn test_set_clamps_to_bounds() {
        let mut cfg = SchedulerConfig::default();
        assert_eq!(cfg.set(Tunable::RevPenalty, -5), 0);
        assert_eq!(cfg.get(Tunable::RevPenalty), 0);
        assert_eq!(cfg.set(Tunable::FifoBatch, i64::MAX), TUNABLE_MAX);
        assert_eq!(cfg.set(Tunable::WritesStarved, 3), 3);
    }

    #[test]
    fn test_tunable_names_round_trip() {
        for tunable in Tunable::ALL {
            assert_eq!(tunable.name().parse::<Tunable>(), Ok(tunable));
        }
        assert_eq!(
            "sync_expire".parse::<Tunable>(),
            Err(TunableError::Unknown("sync_expire".to_string()))
        );
    }

    #[test]
    fn test_apply_assignment() {
        let mut cfg = SchedulerConfig::default();
        assert_eq!(
            cfg.apply_assignment("rev_penalty = 1"),
            Ok((Tunable::RevPenalty, 1))
        );
        assert_eq!(cfg.rev_penalty, 1);
        assert!(matches!(
            cfg.apply_assignment("rev_penalty"),
            Err(TunableError::Malformed(_))
        ));
        assert!(matches!(
            cfg.apply_assignment("fifo_batch=lots"),
            Err(TunableError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"scheduler": {"rev_penalty": 1}}"#).unwrap();
        assert_eq!(cfg.scheduler.rev_penalty, 1);
        assert_eq!(cfg.scheduler.fifo_batch, 8);
        assert_eq!(cfg.device, DeviceConfig::default());
    }

    #[test]
    fn test_sanitized_clamps_oversized_values() {
        let cfg = SchedulerConfig {
            fifo_batch: u64::MAX,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(cfg.get(Tunable::FifoBatch), TUNABLE_MAX);
    }
}
