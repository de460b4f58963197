//! Logrelay gateway: streams progress to WebSocket clients and records results.
//!
//! Usage:
//!     logrelay-gateway --bind 127.0.0.1:8080 --db ./logrelay.sqlite

use clap::Parser;
use logrelay_broker::cancel::install_signal_handlers;
use logrelay_broker::CancellationToken;
use logrelay_gateway::GatewayArgs;
use logrelay_logging::{init_logging, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "logrelay-gateway", about = "WebSocket gateway for logrelay")]
struct Cli {
    /// Verbose logging on stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    args: GatewayArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(LogConfig {
        app_name: "logrelay-gateway",
        verbose: cli.verbose,
    })?;

    let cancel = CancellationToken::new();
    install_signal_handlers(&cancel)?;

    logrelay_gateway::run(cli.args, cancel).await
}
