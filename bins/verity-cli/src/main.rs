mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "verity-cli")]
#[command(about = "Verity CLI - Run, inspect and queue Python submissions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a submission locally and print its outcome
    Run {
        /// Request file: {"code": "...", "testCases": [{"input": "...", "output": "..."}]}
        #[arg(short, long)]
        file: PathBuf,

        /// Wall-clock timeout over the whole submission
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Sandbox backend (process or docker)
        #[arg(short, long)]
        backend: Option<String>,

        /// Pretty-print the outcome JSON
        #[arg(long, default_value = "false")]
        pretty: bool,
    },

    /// Show how a test-case input is parsed
    Parse {
        /// Test-case input text, e.g. "nums = [1,2], target = 3"
        #[arg(short, long)]
        input: String,

        /// Optional expected-output text
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Queue a submission for the worker
    Submit {
        /// Request file, same shape as for `run`
        #[arg(short, long)]
        file: PathBuf,

        /// Override the worker's timeout for this job
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Fetch the stored result of a queued submission
    Result {
        /// Job id printed by `submit`
        #[arg(short, long)]
        id: uuid::Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            timeout_ms,
            backend,
            pretty,
        } => {
            let all_passed = commands::run_local(&file, timeout_ms, backend.as_deref(), pretty).await?;
            if !all_passed {
                std::process::exit(1);
            }
        }
        Commands::Parse { input, output } => {
            commands::show_parse(&input, output.as_deref())?;
        }
        Commands::Submit { file, timeout_ms } => {
            commands::submit(&file, timeout_ms).await?;
        }
        Commands::Result { id } => {
            commands::fetch_result(&id).await?;
        }
    }

    Ok(())
}
