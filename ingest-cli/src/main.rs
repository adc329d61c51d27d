mod cli;
mod commands;
mod config;
mod error;
mod http;
mod output;
mod size;

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    config::AppConfig,
    error::Result,
};
use clap::Parser;
use ingest_upload::UploadMetadata;
use std::process;
use tracing::{Level, debug, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;
    http::install_rustls_provider();

    if let Commands::Config { show, reset } = &args.command {
        if *reset {
            AppConfig::reset(args.config.as_deref())?;
            println!("✓ Configuration reset to defaults");
        } else if *show {
            let config = AppConfig::load(args.config.as_deref())?;
            println!("{}", config.show()?);
        } else {
            println!("Use --show to display current configuration or --reset to reset to defaults");
        }
        return Ok(());
    }

    let config = AppConfig::load(args.config.as_deref())?.with_overrides(args.server, args.token);
    debug!(server = %config.server.url, "Configuration loaded");

    let executor = CommandExecutor::new(config, args.quiet)?;

    match args.command {
        Commands::Upload {
            file,
            clip_amount,
            season,
            year,
            chunk_size,
            no_watch,
        } => {
            let metadata = UploadMetadata {
                clip_amount,
                season,
                year,
            };
            executor
                .upload(&file, metadata, chunk_size, !no_watch)
                .await?;
        }

        Commands::Watch {
            job_id,
            force_on_stuck,
        } => {
            executor.watch(&job_id, force_on_stuck).await?;
        }

        Commands::Status { job_id } => {
            executor.status(&job_id).await?;
        }

        Commands::ForceComplete { job_id } => {
            executor.force_complete(&job_id).await?;
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    subscriber
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .init();
    Ok(())
}
