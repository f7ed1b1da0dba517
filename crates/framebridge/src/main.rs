#[cfg(unix)]
mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;
use framebridge::config::{AppConfig, CONFIG_ENV};

use crate::exit::{config_error, io_error, CliError, CliResult};
use crate::logging::{init_logging, LogFormat, LogLevel, LogSinks};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "framebridge",
    version,
    about = "Move frames between a capture process and an inference process"
)]
struct Cli {
    /// Configuration file (TOML).
    #[arg(long, short = 'c', value_name = "PATH", env = CONFIG_ENV, global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format.
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level. Overrides `logging.level`.
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<LogLevel>,

    #[cfg(unix)]
    #[command(subcommand)]
    command: cmd::Command,
}

fn setup(cli: &Cli) -> CliResult<AppConfig> {
    let cfg = AppConfig::load(cli.config.as_deref())
        .map_err(|err| config_error("configuration failed", err))?;

    let level = match cli.log_level {
        Some(level) => level,
        None => cfg.logging.level.parse().map_err(|msg: String| {
            CliError::new(exit::CONFIG_INVALID, format!("logging.level: {msg}"))
        })?,
    };
    let sinks = LogSinks::from_config(cfg.logging.file.as_deref(), cfg.logging.console);
    init_logging(cli.log_format, level, sinks)
        .map_err(|err| io_error("log file setup failed", err))?;

    Ok(cfg)
}

#[cfg(unix)]
fn main() {
    let cli = Cli::parse();

    let result = setup(&cli).and_then(|cfg| {
        let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
        cmd::run(cli.command, &cfg, format)
    });

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(not(unix))]
fn main() {
    let cli = Cli::parse();
    if let Err(err) = setup(&cli) {
        eprintln!("error: {err}");
        std::process::exit(err.code);
    }
    eprintln!("error: framebridge channels require a unix platform");
    std::process::exit(exit::USAGE);
}
