mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::exit::io_error;
use crate::logging::{init_logging, LogContext, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "sideassist", version, about = "SideAssist broker, validator and client tools")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Also write logs to `<DIR>/<client-id>.log`, rotating older files.
    #[arg(long, value_name = "DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();

    let log_file = match &cli.log_dir {
        Some(dir) => match LogContext::open(dir, cli.command.log_name()) {
            Ok(context) => Some(context),
            Err(err) => {
                let err = io_error(&format!("cannot open log in {}", dir.display()), err);
                eprintln!("error: {err}");
                std::process::exit(err.code);
            }
        },
        None => None,
    };
    init_logging(cli.log_format, cli.log_level, log_file.as_ref());
    if let Some(context) = &log_file {
        tracing::info!(path = %context.path().display(), "logging to file");
    }

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    if let Some(context) = &log_file {
        if let Err(err) = context.shutdown() {
            eprintln!("warning: failed to flush log file: {err}");
        }
    }

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!(code = err.code, "{err}");
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
