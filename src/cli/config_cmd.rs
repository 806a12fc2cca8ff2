//! Config CLI subcommands: show, defaults, validate.
//!
//! These read configuration straight from environment variables.

use crate::config;

/// Print the effective config as key-value pairs to stdout.
pub fn run_show() {
    for (key, value) in config::load().effective() {
        println!("{}={}", key, value);
    }
}

/// Print documented defaults (no env overrides) to stdout.
pub fn run_defaults() {
    // Worker and carrier defaults depend on the host, so show the rule.
    println!("LOCKPROBE_WORKERS=<cpus - 1>");
    println!("LOCKPROBE_CARRIERS=<cpus>");
    println!("LOCKPROBE_MODE=multi");
    println!("LOCKPROBE_PARK_MICROS=1000");
    println!("LOCKPROBE_PROBE_TIMEOUT_MS=10000");
    println!("LOCKPROBE_PROBE_MAX_POLLS=0");
    println!("LOCKPROBE_JOIN_TIMEOUT_SECS=30");
    println!("LOCKPROBE_RUNS=1");
    println!("LOCKPROBE_LOG_FORMAT=pretty");
    println!("LOCKPROBE_LOG=info");
    println!("LOCKPROBE_LOG_FILE=");
}

/// Check the effective configuration for settings that cannot produce a
/// meaningful run.
///
/// Returns 0 if valid, 1 if any warnings are found.
pub fn run_validate() -> i32 {
    let warnings = validate(&config::load());
    for w in &warnings {
        eprintln!("WARNING: {}", w);
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn validate(cfg: &config::EnvConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let h = &cfg.harness;

    if h.worker_count == 0 {
        warnings.push("LOCKPROBE_WORKERS is 0; runs pass trivially without contention".to_string());
    }
    if h.probe.timeout.is_none() && h.probe.max_polls.is_none() {
        warnings.push(
            "probe is unbounded (LOCKPROBE_PROBE_TIMEOUT_MS=0 and LOCKPROBE_PROBE_MAX_POLLS=0); \
             a stuck worker will hang the run"
                .to_string(),
        );
    }
    if h.park_delay.is_zero() {
        warnings.push("LOCKPROBE_PARK_MICROS is 0; foreign calls do not block".to_string());
    }
    warnings
}
