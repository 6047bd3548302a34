//! drm command-line interface.
//!
//! Submits batch jobs to whichever workload manager is installed (PBS, SGE,
//! SLURM) or runs them locally with `bash`.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{detect, run, submit, wait};

/// drm - portable batch-job submission for PBS, SGE and SLURM
#[derive(Parser)]
#[command(name = "drm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the scheduler found on this host
    Detect,

    /// Submit one job
    Submit(submit::SubmitArgs),

    /// Submit every job of a YAML pipeline
    Run {
        /// Pipeline file
        pipeline: PathBuf,

        /// Scheduler (pbs, sge, slurm, local); overrides the file
        #[arg(long, env = "DRM_SCHEDULER")]
        scheduler: Option<String>,

        /// Wait for the submitted jobs (SLURM only)
        #[arg(short, long)]
        wait: bool,
    },

    /// Wait for SLURM jobs to finish
    Wait {
        /// Job IDs
        #[arg(required = true)]
        job_ids: Vec<String>,

        /// Seconds between accounting queries
        #[arg(short, long, default_value = "60")]
        interval: u64,

        /// Give up after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Ignore accounting rows submitted before this local time
        /// (YYYY-MM-DDTHH:MM:SS or YYYY-MM-DD); default: newest row per id
        #[arg(long, value_parser = wait::parse_since)]
        since: Option<NaiveDateTime>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Detect => {
            detect::execute();
            Ok(())
        }

        Commands::Submit(args) => submit::execute(args).await,

        Commands::Run {
            pipeline,
            scheduler,
            wait: do_wait,
        } => run::execute(&pipeline, scheduler.as_deref(), do_wait).await,

        Commands::Wait {
            job_ids,
            interval,
            timeout,
            since,
        } => wait::execute(job_ids, interval, timeout, since).await,
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
