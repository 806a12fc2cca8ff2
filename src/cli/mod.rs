//! CLI subcommands for lockprobe.
//!
//! ## Usage
//!
//! ```bash
//! lockprobe-cli run --workers 4      # one run, exit 0 on PASS
//! lockprobe-cli run --mode all --json
//! lockprobe-cli config show           # effective configuration
//! ```

pub mod config_cmd;
pub mod run_cmd;

pub use run_cmd::{exit_code, parse_run_args, RunOptions};

/// Every invariant held.
pub const EXIT_PASS: i32 = 0;
/// At least one run failed.
pub const EXIT_FAIL: i32 = 1;
/// Bad arguments or the scheduler could not be built.
pub const EXIT_CONFIG: i32 = 2;

/// Split `argv` (without the program name) into a command and its arguments.
///
/// `run` is the default: no arguments, or arguments that start with a flag,
/// go to `run`.
pub fn split_command(args: &[String]) -> (&str, &[String]) {
    match args.first() {
        None => ("run", args),
        Some(first) if first.starts_with("--") && !is_global_flag(first) => ("run", args),
        Some(first) => (first.as_str(), &args[1..]),
    }
}

fn is_global_flag(arg: &str) -> bool {
    matches!(arg, "--help" | "--version")
}
