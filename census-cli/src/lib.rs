//! Command-line interface for loading census releases into PostGIS.
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod config;
mod divisions;
mod error;
mod load;

pub use error::CliError;

use config::LoadArgs;
use load::{run_check, run_load, write_load_report};

/// Run the census CLI with the current process arguments and environment.
pub fn run() -> Result<(), CliError> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => {
            // --help and --version
            return err.print().map_err(CliError::WriteOutput);
        }
        Err(err) => return Err(CliError::ArgumentParsing(err)),
    };
    init_logging(cli.verbose, cli.debug)?;

    let mut stdout = std::io::stdout().lock();
    match cli.command {
        Command::Load(args) => {
            let report = run_load(args)?;
            write_load_report(&mut stdout, &report).map_err(CliError::WriteOutput)?;
        }
        Command::Check(args) => run_check(args, &mut stdout)?,
    }
    Ok(())
}

fn init_logging(verbose: bool, debug: bool) -> Result<(), CliError> {
    let level = if debug {
        Level::DEBUG
    } else if verbose {
        Level::INFO
    } else {
        Level::WARN
    };
    tracing_log::LogTracer::init().map_err(|err| CliError::Logging(err.to_string()))?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| CliError::Logging(err.to_string()))
}

#[derive(Debug, Parser)]
#[command(
    name = "census",
    about = "Load Australian census releases into PostGIS",
    version
)]
struct Cli {
    /// Log progress.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Log every statement and decision.
    #[arg(short, long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import boundaries and datapacks, link them and dump the schema.
    Load(LoadArgs),
    /// Validate the release and metadata without touching a database.
    Check(LoadArgs),
}

#[cfg(test)]
mod tests;
