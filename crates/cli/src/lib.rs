pub mod commands;

use std::ffi::OsString;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use vouchy_core::config::{AppConfig, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "vouchy",
    about = "Vouchy operator CLI",
    long_about = "Operate Vouchy migrations, demo seeds, config inspection, and smoke validation.",
    after_help = "Examples:\n  vouchy doctor --json\n  vouchy config --effective\n  vouchy smoke"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo coupon dataset and verify it against the seed contract")]
    Seed {
        #[arg(long, help = "Verify existing seed data without loading anything")]
        verify_only: bool,
    },
    #[command(about = "Run end-to-end readiness checks with per-check timing details")]
    Smoke,
    #[command(
        about = "Validate configuration; with --effective, print every value with its source"
    )]
    Config {
        #[arg(long, help = "Print the effective configuration with per-field source attribution")]
        effective: bool,
    },
    #[command(about = "Validate config, logging readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let result = execute(cli);

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Parses `args` and executes like [`run`], but hands the result back
/// instead of printing, so tests can drive the binary surface in-process.
pub fn run_with_args<I, T>(args: I) -> commands::CommandResult
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => execute(cli),
        Err(error) => {
            // Help and version render through the same path; only genuine
            // usage errors carry the non-zero code.
            let exit_code = if error.use_stderr() { 2 } else { 0 };
            commands::CommandResult { exit_code, output: error.to_string() }
        }
    }
}

fn execute(cli: Cli) -> commands::CommandResult {
    init_logging();

    match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { verify_only } => commands::seed::run(verify_only),
        Command::Smoke => commands::smoke::run(),
        Command::Config { effective } => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(effective) }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    }
}

/// Initializes the tracing subscriber from the `[logging]` config section.
///
/// Best effort: a broken config falls back to compact INFO so the command
/// itself still reports the failure through its own output path. `try_init`
/// keeps the first subscriber when commands run repeatedly in one process.
fn init_logging() {
    use tracing::Level;

    let logging = AppConfig::load(LoadOptions::default())
        .map(|config| config.logging)
        .unwrap_or_else(|_| AppConfig::default().logging);
    let log_level = logging.level.parse::<Level>().unwrap_or(Level::INFO);

    let builder = tracing_subscriber::fmt().with_target(false).with_max_level(log_level);
    let _ = match logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
