mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gavel_core::langs::ForceMode;

#[derive(Parser)]
#[command(name = "gavel")]
#[command(about = "Gavel - Judge competitive programming solutions locally", long_about = None)]
struct Cli {
    /// Settings file (defaults are used when absent).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge a problem's test cases
    Run {
        /// Problem file to judge
        problem: PathBuf,

        /// Judge only the case at this position (1-based)
        #[arg(long)]
        case: Option<usize>,

        /// Recompile even when the cached artifact is fresh
        #[arg(long)]
        recompile: bool,

        /// Reuse the cached artifact without checking the source
        #[arg(long, conflicts_with = "recompile")]
        skip_compile: bool,
    },

    /// Hunt for a counterexample with a generator and a brute force
    Stress {
        /// Problem file with generator and brute force configured
        problem: PathBuf,
    },

    /// Create a new problem file
    Init {
        /// Where to write the problem file
        path: PathBuf,

        /// Problem name (defaults to the solution's file stem)
        #[arg(long)]
        name: Option<String>,

        /// Solution source file
        #[arg(long)]
        solution: PathBuf,

        /// Checker source or prebuilt checker binary
        #[arg(long)]
        checker: Option<PathBuf>,

        /// Interactor source or prebuilt interactor binary
        #[arg(long)]
        interactor: Option<PathBuf>,

        /// Generator for stress runs
        #[arg(long)]
        generator: Option<PathBuf>,

        /// Brute force reference for stress runs
        #[arg(long)]
        brute_force: Option<PathBuf>,

        /// Time limit in milliseconds
        #[arg(long, default_value_t = 3000)]
        time_limit: u64,

        /// Memory limit in MiB
        #[arg(long, default_value_t = 256)]
        memory_limit: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Run { problem, case, recompile, skip_compile } => {
            let force = force_mode(recompile, skip_compile);
            commands::run(cli.config.as_deref(), &problem, case, force).await?;
        }
        Commands::Stress { problem } => {
            commands::stress(cli.config.as_deref(), &problem).await?;
        }
        Commands::Init {
            path,
            name,
            solution,
            checker,
            interactor,
            generator,
            brute_force,
            time_limit,
            memory_limit,
        } => {
            commands::init(commands::InitArgs {
                path,
                name,
                solution,
                checker,
                interactor,
                generator,
                brute_force,
                time_limit,
                memory_limit,
            })
            .await?;
        }
    }

    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn force_mode(recompile: bool, skip_compile: bool) -> ForceMode {
    if recompile {
        ForceMode::Recompile
    } else if skip_compile {
        ForceMode::SkipCompile
    } else {
        ForceMode::Auto
    }
}
