mod cli;
mod commands;
mod config;
mod error;
mod server;

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    config::AppConfig,
    error::Result,
};
use clap::Parser;
use std::process;
use tracing::{Level, debug, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let config = AppConfig::load(args.config.as_deref())?.merge_flags(
        args.origin,
        args.cache_dir,
        args.no_persist,
    );
    debug!("Starting encore with config: {:?}", config);

    let executor = CommandExecutor::new(config, args.verbose);

    match args.command {
        Commands::Warm {
            manifest,
            preferred,
        } => {
            executor.warm(&manifest, preferred.as_deref()).await?;
        }

        Commands::Serve { listen } => {
            executor.serve(executor.listen_address(listen)).await?;
        }

        Commands::Status => {
            executor.status().await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_level(verbose))
        .with(filter)
        .init();
}
