//! lockprobe entry point.
//!
//! ## CLI Subcommands
//!
//! - `lockprobe-cli`, `lockprobe-cli run` or `lockprobe-cli --flags` - Run the
//!   lock protocol (exit 0/1)
//! - `lockprobe-cli config show|defaults|validate` - Inspect configuration
//! - `lockprobe-cli help` / `version`

use std::process::ExitCode;

use lockprobe::cli::{self, config_cmd, run_cmd, EXIT_CONFIG};
use lockprobe::config;
use lockprobe::telemetry;

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let (command, rest) = cli::split_command(&argv);

    match command {
        "run" | "" => {
            let env = config::load();
            if let Err(e) = telemetry::init_logging(&env.log) {
                eprintln!("Logging disabled: {}", e);
            }
            match cli::parse_run_args(rest, env) {
                Ok(options) => exit(run_cmd::run(&options)),
                Err(e) => {
                    eprintln!("{}", e);
                    print_command_help("run");
                    exit(EXIT_CONFIG)
                }
            }
        }
        "config" => {
            let subcommand = rest.first().map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    config_cmd::run_show();
                    ExitCode::SUCCESS
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => exit(config_cmd::run_validate()),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = rest.first() {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("lockprobe {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "lockprobe - lock hand-off verification harness v{}

USAGE:
    lockprobe-cli [COMMAND] [OPTIONS]

COMMANDS:
    run          Run the lock protocol (default when no command given)
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

ENVIRONMENT:
    LOCKPROBE_WORKERS     Workers per run (default: CPUs - 1)
    LOCKPROBE_CARRIERS    Carrier threads (default: CPUs)
    LOCKPROBE_MODE        multi, current or all (default: multi)
    LOCKPROBE_LOG         Log filter (default: RUST_LOG, then info)
    LOCKPROBE_LOG_FORMAT  json or pretty (default: pretty)
    LOCKPROBE_LOG_FILE    Write logs to a file instead of stderr

EXIT CODES:
    0  PASS
    1  FAIL
    2  Configuration error
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "run" => {
            eprintln!(
                "lockprobe-cli run - Run the lock protocol

USAGE:
    lockprobe-cli run [OPTIONS]

OPTIONS:
    --workers N          Workers spawned per run
    --carriers N         Carrier threads for the multi-thread scheduler
    --mode MODE          multi, current or all
    --runs N             Independent runs per mode
    --park-micros N      Time each foreign call blocks inside the lock
    --fault-worker N     Make worker N leave before parking
    --fault-kind KIND    exit (default), panic, or stall[:MS] (default 1000 ms)
    --json               Print reports as JSON

EXAMPLES:
    lockprobe-cli run --workers 4
    lockprobe-cli run --mode all --runs 10
    lockprobe-cli run --workers 4 --fault-worker 3
    lockprobe-cli --workers 4 --json
"
            );
        }
        "config" => {
            eprintln!(
                "lockprobe-cli config - Inspect configuration

USAGE:
    lockprobe-cli config <SUBCOMMAND>

SUBCOMMANDS:
    show           Show effective configuration
    defaults       Show default configuration
    validate       Warn about settings that cannot produce a meaningful run
"
            );
        }
        _ => {
            eprintln!(
                "No detailed help available for '{}'. Use 'lockprobe-cli help' for general usage.",
                command
            );
        }
    }
}
