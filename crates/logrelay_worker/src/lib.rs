//! Processing side of the log relay pipeline.
//!
//! - [`scanner`]: counts marker lines in one file and reports progress
//! - [`pool`]: fixed worker pool with a per-batch completion barrier
//! - [`relay`]: consumes processing requests from the broker and republishes
//!   progress and result events

pub mod pool;
pub mod relay;
pub mod scanner;

pub use pool::{PoolConfig, PoolError, ScanObserver, WorkerPool};
pub use relay::{PublishStats, RelayServer};
pub use scanner::{scan_file, LineKind, ProgressUpdate, ScanError, ScanMarkers};

use anyhow::Context;
use logrelay_broker::{BrokerArgs, CancellationToken, TopicArgs, ZmqBroker};
use logrelay_protocol::defaults::{
    DEFAULT_ERROR_MARKER, DEFAULT_QUEUE_CAPACITY, DEFAULT_UPLOAD_DIR, DEFAULT_WARN_MARKER,
    DEFAULT_WORKERS,
};
use logrelay_protocol::{BrokerConfig, RelayConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(clap::Args, Debug, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    #[command(flatten)]
    pub topics: TopicArgs,

    /// Number of concurrent file scans
    #[arg(long, env = "LOGRELAY_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Jobs buffered ahead of the workers
    #[arg(long, env = "LOGRELAY_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Directory requested file names are resolved against
    #[arg(long, env = "LOGRELAY_UPLOAD_DIR", default_value = DEFAULT_UPLOAD_DIR)]
    pub upload_dir: PathBuf,

    /// Substring marking an error line
    #[arg(long, default_value = DEFAULT_ERROR_MARKER)]
    pub error_marker: String,

    /// Substring marking a warning line
    #[arg(long, default_value = DEFAULT_WARN_MARKER)]
    pub warn_marker: String,
}

impl WorkerArgs {
    pub fn broker_config(&self) -> BrokerConfig {
        self.broker.clone().into()
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            topics: self.topics.clone().into(),
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            upload_dir: self.upload_dir.clone(),
            error_marker: self.error_marker.clone(),
            warn_marker: self.warn_marker.clone(),
        }
    }
}

/// Connect to the broker and serve processing requests until cancelled.
pub async fn run(args: WorkerArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let broker_config = args.broker_config();
    let relay_config = args.relay_config();

    info!("Starting logrelay worker");
    info!("  Broker: {} / {}", broker_config.frontend, broker_config.backend);
    info!("  Upload dir: {}", relay_config.upload_dir.display());
    info!("  Workers: {}", relay_config.workers);

    let broker = ZmqBroker::connect(broker_config)
        .await
        .context("Failed to connect to broker")?;
    let relay = RelayServer::new(relay_config, Arc::new(broker));
    relay.run(cancel).await.context("Relay server failed")?;
    Ok(())
}
