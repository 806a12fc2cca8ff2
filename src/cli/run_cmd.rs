//! `run` subcommand: execute the harness and map the verdict to an exit code.

use crate::config::{EnvConfig, ModeSelection, MAX_PARK_MICROS, MAX_WORKERS};
use crate::error::HarnessError;
use crate::harness::{run_blocking, RunReport};
use crate::scheduler::{FaultKind, FaultPlan};

use super::{EXIT_CONFIG, EXIT_FAIL, EXIT_PASS};

/// Parsed `run` options layered over the environment configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: EnvConfig,
    pub json: bool,
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, HarnessError> {
    args.get(i + 1)
        .map(|s| s.as_str())
        .ok_or_else(|| HarnessError::Config(format!("missing value for {flag}")))
}

fn number<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T, HarnessError> {
    raw.parse::<T>()
        .map_err(|_| HarnessError::Config(format!("invalid value '{raw}' for {flag}")))
}

/// Stall used by `--fault-kind stall` when no duration is given.
const DEFAULT_STALL_MS: u64 = 1000;

fn parse_fault_kind(raw: &str) -> Result<FaultKind, HarnessError> {
    match raw.split_once(':') {
        None if raw == "exit" => Ok(FaultKind::ExitBeforePark),
        None if raw == "panic" => Ok(FaultKind::PanicBeforePark),
        None if raw == "stall" => Ok(FaultKind::StallBeforePark {
            millis: DEFAULT_STALL_MS,
        }),
        Some(("stall", ms)) => Ok(FaultKind::StallBeforePark {
            millis: number(ms, "--fault-kind stall")?,
        }),
        _ => Err(HarnessError::Config(format!(
            "unknown fault kind '{raw}' (expected exit, panic or stall[:MS])"
        ))),
    }
}

/// Apply command-line flags on top of `base`. Flags win over env vars.
pub fn parse_run_args(args: &[String], base: EnvConfig) -> Result<RunOptions, HarnessError> {
    let mut config = base;
    let mut json = false;
    let mut fault_worker: Option<u32> = None;
    let mut fault_kind = FaultKind::ExitBeforePark;

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--workers" => {
                let n: usize = number(value(args, i, flag)?, flag)?;
                if n > MAX_WORKERS {
                    return Err(HarnessError::Config(format!(
                        "--workers must be at most {MAX_WORKERS}"
                    )));
                }
                config.harness.worker_count = n;
                i += 2;
            }
            "--carriers" => {
                config.carriers = number::<usize>(value(args, i, flag)?, flag)?.max(1);
                i += 2;
            }
            "--mode" => {
                config.modes = value(args, i, flag)?.parse::<ModeSelection>()?;
                i += 2;
            }
            "--runs" => {
                config.runs = number::<usize>(value(args, i, flag)?, flag)?.max(1);
                i += 2;
            }
            "--park-micros" => {
                let us: u64 = number(value(args, i, flag)?, flag)?;
                if us > MAX_PARK_MICROS {
                    return Err(HarnessError::Config(format!(
                        "--park-micros must be at most {MAX_PARK_MICROS}"
                    )));
                }
                config.harness.park_delay = std::time::Duration::from_micros(us);
                i += 2;
            }
            "--fault-worker" => {
                fault_worker = Some(number(value(args, i, flag)?, flag)?);
                i += 2;
            }
            "--fault-kind" => {
                fault_kind = parse_fault_kind(value(args, i, flag)?)?;
                i += 2;
            }
            "--json" => {
                json = true;
                i += 1;
            }
            other => {
                return Err(HarnessError::Config(format!("unknown argument: {other}")));
            }
        }
    }

    if let Some(worker) = fault_worker {
        if worker == 0 || worker as usize > config.harness.worker_count {
            return Err(HarnessError::Config(format!(
                "--fault-worker must be between 1 and {}",
                config.harness.worker_count
            )));
        }
        config.harness.fault = Some(FaultPlan {
            worker,
            kind: fault_kind,
        });
    }

    Ok(RunOptions { config, json })
}

/// Execute every selected mode and run. Returns the process exit code.
pub fn run(options: &RunOptions) -> i32 {
    let mut reports: Vec<RunReport> = Vec::new();
    for mode in options.config.carrier_modes() {
        match run_blocking(mode, &options.config.harness, options.config.runs) {
            Ok(mut r) => reports.append(&mut r),
            Err(e) => {
                eprintln!("Error: {}", e);
                return EXIT_CONFIG;
            }
        }
    }

    if options.json {
        match serde_json::to_string_pretty(&reports) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Failed to encode report: {}", e);
                return EXIT_FAIL;
            }
        }
    } else {
        for report in &reports {
            println!("{}", report.summary());
            if !report.verdict.is_pass() {
                eprintln!("{}", report.diagnostics());
            }
        }
    }

    exit_code(&reports)
}

/// `0` when every report passed, `1` otherwise.
pub fn exit_code(reports: &[RunReport]) -> i32 {
    if reports.iter().all(|r| r.verdict.is_pass()) {
        EXIT_PASS
    } else {
        EXIT_FAIL
    }
}
