//! Logrelay launcher.
//!
//! Usage:
//!     logrelay start                  # broker + worker + gateway in one process
//!     logrelay broker                 # forwarder only
//!     logrelay worker                 # relay server + worker pool
//!     logrelay gateway                # WebSocket endpoint + result store
//!     logrelay submit app.log db.log  # publish a processing request
//!     logrelay generate big.log --size-mb 500

mod cli;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logrelay_broker::cancel::install_signal_handlers;
use logrelay_broker::{BrokerArgs, CancellationToken, Forwarder};
use logrelay_gateway::GatewayArgs;
use logrelay_logging::{init_logging, LogConfig};
use logrelay_worker::WorkerArgs;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "logrelay", about = "Unified launcher for logrelay")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run broker, worker and gateway together
    Start(cli::start::StartArgs),

    /// Run the broker forwarder
    Broker {
        #[command(flatten)]
        args: BrokerArgs,
    },

    /// Run the relay server and worker pool
    Worker {
        #[command(flatten)]
        args: WorkerArgs,
    },

    /// Run the WebSocket gateway and result consumer
    Gateway {
        #[command(flatten)]
        args: GatewayArgs,
    },

    /// Publish a processing request for uploaded files
    Submit(cli::submit::SubmitArgs),

    /// Write a synthetic log file
    Generate(cli::generate::GenerateArgs),
}

impl Commands {
    fn app_name(&self) -> &'static str {
        match self {
            Commands::Start(_) => "logrelay",
            Commands::Broker { .. } => "logrelay-broker",
            Commands::Worker { .. } => "logrelay-worker",
            Commands::Gateway { .. } => "logrelay-gateway",
            Commands::Submit(_) | Commands::Generate(_) => "logrelay-cli",
        }
    }

    fn is_server(&self) -> bool {
        matches!(
            self,
            Commands::Start(_) | Commands::Broker { .. } | Commands::Worker { .. } | Commands::Gateway { .. }
        )
    }
}

async fn run_broker(args: BrokerArgs, cancel: CancellationToken) -> Result<()> {
    let forwarder = Forwarder::bind(args.into())
        .await
        .context("Failed to bind broker endpoints")?;
    let forwarded = forwarder.run(cancel).await?;
    info!(forwarded, "Broker stopped");
    Ok(())
}

async fn run(command: Commands) -> Result<()> {
    let cancel = CancellationToken::new();
    if command.is_server() {
        install_signal_handlers(&cancel)?;
    }

    match command {
        Commands::Start(args) => cli::start::run(args, cancel).await,
        Commands::Broker { args } => run_broker(args, cancel).await,
        Commands::Worker { args } => logrelay_worker::run(args, cancel).await,
        Commands::Gateway { args } => logrelay_gateway::run(args, cancel).await,
        Commands::Submit(args) => cli::submit::run(args).await,
        Commands::Generate(args) => cli::generate::run(args),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match init_logging(LogConfig {
        app_name: cli.command.app_name(),
        verbose: cli.verbose,
    }) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Warning: logging not initialized: {:#}", err);
            None
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start async runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
