//! Sonara CLI - run and inspect the authentication gateway.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "sonara")]
#[command(about = "Sonara - media server gateway")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "SONARA_PORT")]
        port: Option<u16>,

        /// Bind address
        #[arg(long, env = "SONARA_BIND")]
        bind: Option<String>,

        /// Data directory for the user store
        #[arg(long, env = "SONARA_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },

    /// Show whether the first admin still needs to be created
    Status {
        /// Data directory for the user store
        #[arg(long, env = "SONARA_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Also query a running gateway at this base URL
        #[arg(long)]
        probe: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve {
            port,
            bind,
            data_dir,
        } => {
            let args = commands::serve::ServeArgs {
                port,
                bind,
                data_dir,
            };
            commands::run_serve(args).await?;
        }

        Commands::Status { data_dir, probe } => {
            let args = commands::status::StatusArgs { data_dir, probe };
            commands::run_status(args).await?;
        }
    }

    Ok(())
}
