mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gradebox-cli")]
#[command(about = "Gradebox CLI - Grade submissions locally or through the job queue", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a request against the local Docker daemon and print the verdict
    Run {
        /// Path to an execution request JSON file
        #[arg(short, long)]
        request: PathBuf,

        /// Engine config file (defaults to config/engine.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write the generated workspace for a request without executing it
    Render {
        /// Path to an execution request JSON file
        #[arg(short, long)]
        request: PathBuf,

        /// Output directory for the staged files
        #[arg(short, long)]
        out: PathBuf,

        /// Engine config file (defaults to config/engine.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List supported frameworks and the image each one runs in
    Frameworks {
        /// Engine config file (defaults to config/engine.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Enqueue a request for the worker
    Submit {
        /// Path to an execution request JSON file
        #[arg(short, long)]
        request: PathBuf,

        /// Seconds to wait for the verdict (0 returns immediately)
        #[arg(short, long, default_value = "0")]
        wait: u64,
    },

    /// Fetch the verdict of a submitted job
    Status {
        /// Job id printed by `submit`
        #[arg(short, long)]
        job: uuid::Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { request, config } => {
            commands::run_request(&request, config.as_deref()).await?;
        }
        Commands::Render { request, out, config } => {
            commands::render_request(&request, &out, config.as_deref())?;
        }
        Commands::Frameworks { config } => {
            commands::list_frameworks(config.as_deref())?;
        }
        Commands::Submit { request, wait } => {
            commands::submit_request(&request, wait).await?;
        }
        Commands::Status { job } => {
            commands::job_status(&job).await?;
        }
    }

    Ok(())
}
