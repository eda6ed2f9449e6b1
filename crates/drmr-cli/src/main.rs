//! drmr Command-Line Interface
//!
//! Submits annotated shell pipelines to PBS or SLURM, and cleans up after them.
//!
//! ```text
//! drmr submit pipeline.sh --job-name align --mail-at-finish
//! drmr rm --name align --dry-run
//! ```

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{backends, rm, submit, version};

/// drmr - run shell pipelines on HPC batch schedulers
#[derive(Parser)]
#[command(name = "drmr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to ~/.drmrc)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a pipeline script as a graph of batch jobs
    Submit {
        /// Pipeline script ("-" reads standard input)
        script: PathBuf,

        /// Account to charge the jobs to
        #[arg(long)]
        account: Option<String>,

        /// Queue or partition to submit to
        #[arg(long)]
        destination: Option<String>,

        /// Run name; job names derive from it
        #[arg(short, long)]
        job_name: Option<String>,

        /// Send mail when the pipeline finishes
        #[arg(long)]
        mail_at_finish: bool,

        /// Submit jobs held, for release by hand
        #[arg(long)]
        start_held: bool,

        /// Limit how many tasks of each array job run at once
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_concurrent: Option<u32>,

        /// Scheduler job ids the pipeline must wait for
        #[arg(short, long, num_args = 1..)]
        wait_for: Vec<String>,

        /// Skip the success and finish sentinel jobs
        #[arg(long)]
        no_completion_jobs: bool,
    },

    /// Delete jobs by id, name or owner
    Rm {
        /// Job ids to delete
        ids: Vec<String>,

        /// Delete active jobs whose names contain this text
        #[arg(long)]
        name: Option<String>,

        /// Only consider jobs owned by this user
        #[arg(short, long, env = "USER")]
        owner: Option<String>,

        /// Show what would be deleted without deleting anything
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Show which resource managers answer on this system
    Backends,

    /// Show version information
    Version,
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

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Submit {
            script,
            account,
            destination,
            job_name,
            mail_at_finish,
            start_held,
            max_concurrent,
            wait_for,
            no_completion_jobs,
        } => {
            submit::execute(
                &script,
                config,
                account,
                destination,
                job_name,
                mail_at_finish,
                start_held,
                max_concurrent,
                wait_for,
                !no_completion_jobs,
            )
            .await
        }

        Commands::Rm {
            ids,
            name,
            owner,
            dry_run,
        } => rm::execute(config, ids, name, owner, dry_run).await,

        Commands::Backends => backends::execute().await,

        Commands::Version => {
            version::execute();
            Ok(())
        }
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
