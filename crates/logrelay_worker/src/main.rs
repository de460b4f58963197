//! Logrelay worker: scans uploaded log files on request.
//!
//! Usage:
//!     logrelay-worker --broker-frontend tcp://127.0.0.1:5560 --upload-dir ./uploads

use clap::Parser;
use logrelay_broker::cancel::install_signal_handlers;
use logrelay_broker::CancellationToken;
use logrelay_logging::{init_logging, LogConfig};
use logrelay_worker::WorkerArgs;

#[derive(Parser, Debug)]
#[command(name = "logrelay-worker", about = "File scanning worker for logrelay")]
struct Cli {
    /// Verbose logging on stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    args: WorkerArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(LogConfig {
        app_name: "logrelay-worker",
        verbose: cli.verbose,
    })?;

    let cancel = CancellationToken::new();
    install_signal_handlers(&cancel)?;

    logrelay_worker::run(cli.args, cancel).await
}
