//! stmboot CLI - Command-line tool for updating STM32 firmware.
//!
//! ## Features
//!
//! - Stream a raw firmware binary to the serial bootloader
//! - Checksum verification after the transfer
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use stmboot::WordOrder;

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Errors that select a specific exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or setup; exit code 2.
    #[error("{0}")]
    Usage(String),
    /// User aborted a prompt; exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

/// stmboot - Update STM32 firmware through a serial bootloader.
///
/// Environment variables:
///   STMBOOT_PORT              - Default serial port
///   STMBOOT_BAUD              - Default baud rate (default: 115200)
///   STMBOOT_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "stmboot")]
#[command(author, version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Raw firmware binary to flash.
    #[arg(value_name = "FIRMWARE")]
    firmware: Option<PathBuf>,

    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, env = "STMBOOT_PORT")]
    port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, env = "STMBOOT_BAUD")]
    baud: Option<u32>,

    /// Byte order used to group the image into checksum words (little, big, native).
    #[arg(long, value_name = "ORDER")]
    word_order: Option<WordOrder>,

    /// Per-chunk acknowledgement timeout in milliseconds [default: 10000].
    #[arg(long, value_name = "MS")]
    chunk_timeout: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, env = "STMBOOT_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long)]
    confirm_port: bool,

    /// Offer all available ports (including unknown types).
    #[arg(long)]
    list_all_ports: bool,

    /// List available serial ports and exit.
    #[arg(long)]
    list_ports: bool,

    /// Print the port list as JSON to stdout (with --list-ports).
    #[arg(long, requires = "list_ports")]
    json: bool,

    /// Print a shell completion script to stdout and exit.
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,

    /// Path to a configuration file.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // No arguments at all prints help and succeeds.
    if env::args_os().len() <= 1 {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    }

    // clap exits with 0 for --help/--version and 2 for usage errors.
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "stmboot v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
}

fn run(cli: &Cli) -> Result<()> {
    if let Some(shell) = cli.completions {
        commands::completions::cmd_completions(shell);
        return Ok(());
    }

    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    if cli.list_ports {
        commands::ports::cmd_list_ports(cli.json);
        return Ok(());
    }

    match &cli.firmware {
        Some(firmware) => commands::update::cmd_update(cli, &mut config, firmware),
        None => Err(CliError::Usage(
            "no firmware file given; run `stmboot --help` for usage".to_string(),
        )
        .into()),
    }
}

/// Map an error chain to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Cancelled(_)) => 130,
        None => 1,
    }
}

/// Get serial port from CLI args, config, or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}
