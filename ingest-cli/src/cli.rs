use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::size::parse_size;

#[derive(Parser)]
#[command(name = "ingest")]
#[command(about = "Upload clip archives and follow their processing jobs")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// API base URL, overrides the configured server
    #[arg(short, long, global = true)]
    pub server: Option<String>,

    /// Bearer token for the ingestion API
    #[arg(long, global = true, env = "INGEST_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload an archive in chunks and start its processing job
    Upload {
        /// Archive to upload
        file: PathBuf,

        /// Number of clips in the archive
        #[arg(long)]
        clip_amount: u32,

        /// Season label
        #[arg(long)]
        season: String,

        /// Release year
        #[arg(long)]
        year: i32,

        /// Chunk size (e.g. 50MB, 512KB)
        #[arg(long, value_parser = parse_size)]
        chunk_size: Option<u64>,

        /// Exit once the job id is known instead of following the job
        #[arg(long)]
        no_watch: bool,
    },

    /// Follow a processing job until it finishes
    Watch {
        job_id: String,

        /// Force completion automatically when the job is stuck
        #[arg(long)]
        force_on_stuck: bool,
    },

    /// Poll a job's status once
    Status { job_id: String },

    /// Ask the server to mark a job as completed
    ForceComplete { job_id: String },

    /// Show or reset the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Reset configuration to defaults
        #[arg(long)]
        reset: bool,
    },
}
