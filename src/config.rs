//! Harness configuration loading from environment variables.
//!
//! All values come from `LOCKPROBE_*` environment variables with sensible
//! defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `LOCKPROBE_WORKERS` | CPUs - 1 | Workers spawned per run |
//! | `LOCKPROBE_CARRIERS` | CPUs | Carrier threads for the multi-thread scheduler |
//! | `LOCKPROBE_MODE` | multi | Scheduler flavor: `multi`, `current` or `all` |
//! | `LOCKPROBE_PARK_MICROS` | 1000 | Time each foreign call blocks inside the lock |
//! | `LOCKPROBE_PROBE_TIMEOUT_MS` | 10000 | Probe wall-clock bound (0 = unbounded) |
//! | `LOCKPROBE_PROBE_MAX_POLLS` | 0 | Probe poll bound (0 = unbounded) |
//! | `LOCKPROBE_JOIN_TIMEOUT_SECS` | 30 | Bound on joining workers |
//! | `LOCKPROBE_RUNS` | 1 | Independent runs per mode |
//! | `LOCKPROBE_LOG_FORMAT` | pretty | `json` or `pretty` |
//! | `LOCKPROBE_LOG` | info | Log filter (falls back to `RUST_LOG`) |
//! | `LOCKPROBE_LOG_FILE` | unset | Write logs to this file instead of stderr |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::HarnessError;
use crate::harness::{default_worker_count, CarrierMode, HarnessConfig};
use crate::scheduler::ProbeConfig;
use crate::telemetry::{LogConfig, LogFormat};

/// Upper bound on workers; each parked worker pins one blocking thread.
pub const MAX_WORKERS: usize = 4096;
/// Upper bound on the foreign-call park delay.
pub const MAX_PARK_MICROS: u64 = 1_000_000;

/// Which scheduler flavors to exercise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModeSelection {
    #[default]
    Multi,
    Current,
    All,
}

impl ModeSelection {
    /// Carrier modes to run, in order.
    pub fn modes(self, carriers: usize) -> Vec<CarrierMode> {
        let multi = CarrierMode::MultiThread { carriers };
        match self {
            Self::Multi => vec![multi],
            Self::Current => vec![CarrierMode::CurrentThread],
            Self::All => vec![multi, CarrierMode::CurrentThread],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Multi => "multi",
            Self::Current => "current",
            Self::All => "all",
        }
    }
}

impl FromStr for ModeSelection {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "multi" | "multi_thread" => Ok(Self::Multi),
            "current" | "current_thread" => Ok(Self::Current),
            "all" | "both" => Ok(Self::All),
            other => Err(HarnessError::Config(format!("unknown mode '{other}'"))),
        }
    }
}

/// Everything the CLI needs, loaded from the environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub harness: HarnessConfig,
    pub carriers: usize,
    pub modes: ModeSelection,
    pub runs: usize,
    pub log: LogConfig,
}

impl EnvConfig {
    /// Carrier modes selected by this configuration.
    pub fn carrier_modes(&self) -> Vec<CarrierMode> {
        self.modes.modes(self.carriers)
    }

    /// Serializable key-value view of the effective values.
    pub fn effective(&self) -> Vec<(&'static str, String)> {
        let h = &self.harness;
        vec![
            ("LOCKPROBE_WORKERS", h.worker_count.to_string()),
            ("LOCKPROBE_CARRIERS", self.carriers.to_string()),
            ("LOCKPROBE_MODE", self.modes.as_str().to_string()),
            ("LOCKPROBE_PARK_MICROS", h.park_delay.as_micros().to_string()),
            (
                "LOCKPROBE_PROBE_TIMEOUT_MS",
                h.probe.timeout.map_or(0, |t| t.as_millis()).to_string(),
            ),
            (
                "LOCKPROBE_PROBE_MAX_POLLS",
                h.probe.max_polls.unwrap_or(0).to_string(),
            ),
            ("LOCKPROBE_JOIN_TIMEOUT_SECS", h.join_timeout.as_secs().to_string()),
            ("LOCKPROBE_RUNS", self.runs.to_string()),
            (
                "LOCKPROBE_LOG_FORMAT",
                match self.log.format {
                    LogFormat::Json => "json",
                    LogFormat::Pretty => "pretty",
                }
                .to_string(),
            ),
            ("LOCKPROBE_LOG", self.log.level.clone()),
            (
                "LOCKPROBE_LOG_FILE",
                self.log
                    .output_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
        ]
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse any `FromStr` env var, returning `default` on missing or invalid.
fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Zero disables a bound.
fn nonzero<T: PartialEq + Default>(value: T) -> Option<T> {
    (value != T::default()).then_some(value)
}

fn load_probe_config() -> ProbeConfig {
    let timeout_ms = parse_u64("LOCKPROBE_PROBE_TIMEOUT_MS", 10_000);
    let max_polls = parse_u64("LOCKPROBE_PROBE_MAX_POLLS", 0);
    ProbeConfig {
        timeout: nonzero(timeout_ms).map(Duration::from_millis),
        max_polls: nonzero(max_polls),
    }
}

fn load_harness_config() -> HarnessConfig {
    let workers = parse_usize("LOCKPROBE_WORKERS", default_worker_count());
    let workers = workers.min(MAX_WORKERS);
    let park_us = parse_u64("LOCKPROBE_PARK_MICROS", 1000).min(MAX_PARK_MICROS);
    let join_secs = parse_u64("LOCKPROBE_JOIN_TIMEOUT_SECS", 30).max(1);
    HarnessConfig {
        worker_count: workers,
        park_delay: Duration::from_micros(park_us),
        probe: load_probe_config(),
        join_timeout: Duration::from_secs(join_secs),
        fault: None,
    }
}

fn load_log_config() -> LogConfig {
    let level = std::env::var("LOCKPROBE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    LogConfig {
        format: parse_or("LOCKPROBE_LOG_FORMAT", LogFormat::Pretty),
        level,
        output_path: std::env::var("LOCKPROBE_LOG_FILE")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from),
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let carriers = parse_usize("LOCKPROBE_CARRIERS", num_cpus::get()).max(1);
    let runs = parse_usize("LOCKPROBE_RUNS", 1).max(1);
    EnvConfig {
        harness: load_harness_config(),
        carriers,
        modes: parse_or("LOCKPROBE_MODE", ModeSelection::Multi),
        runs,
        log: load_log_config(),
    }
}
