mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod progress;

use clap::Parser;
use cli::{Cli, Commands};
use error::CliError;
use safran_core::engine::error::EngineError;
use tracing::error;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.clone()) {
        eprintln!("could not set up logging: {}", e);
        std::process::exit(1);
    }

    if let Some(threads) = cli.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
        {
            error!("could not configure the thread pool: {}", e);
            std::process::exit(1);
        }
    }

    let result = match &cli.command {
        Commands::Scan(args) => commands::scan::execute(args),
        Commands::Md(args) => commands::md::execute(args),
    };

    match result {
        Ok(()) => {}
        // a requested stop is an orderly shutdown, not a failure
        Err(CliError::Engine(EngineError::StopRequested)) => {}
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
