//! Ingestion side of the log relay pipeline.
//!
//! - [`registry`]: single-owner map of live client connections
//! - [`connection`]: WebSocket handshake and the per-connection pumps
//! - [`feed`]: per-connection broker subscription filtered by client id
//! - [`results`]: result payloads to persisted records
//! - [`sink`]: result store (SQLite or in-memory)
//! - [`submit`]: publishes processing requests for uploaded files

pub mod connection;
pub mod feed;
pub mod registry;
pub mod results;
pub mod server;
pub mod sink;
pub mod submit;

pub use registry::{EvictReason, Registration, Registry, RegistryConfig, RegistryError, RegistryHandle};
pub use results::ResultConsumer;
pub use server::Gateway;
pub use sink::{MemoryResultSink, ResultSink, SinkError, SqliteResultSink};
pub use submit::{generate_client_id, submit, validate_file_names, SubmitError};

use anyhow::Context;
use logrelay_broker::{BrokerArgs, CancellationToken, TopicArgs, ZmqBroker};
use logrelay_protocol::defaults::{
    DEFAULT_GATEWAY_BIND_ADDR, DEFAULT_OUTBOUND_CAPACITY, DEFAULT_RESULTS_DB,
};
use logrelay_protocol::{BrokerConfig, GatewayConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(clap::Args, Debug, Clone)]
pub struct GatewayArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    #[command(flatten)]
    pub topics: TopicArgs,

    /// Address the WebSocket endpoint listens on
    #[arg(long, env = "LOGRELAY_BIND", default_value = DEFAULT_GATEWAY_BIND_ADDR)]
    pub bind: String,

    /// SQLite database for result records
    #[arg(long, env = "LOGRELAY_DB", default_value = DEFAULT_RESULTS_DB)]
    pub db: PathBuf,

    /// Messages queued per client before it is evicted
    #[arg(long, env = "LOGRELAY_OUTBOUND_CAPACITY", default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    pub outbound_capacity: usize,
}

impl GatewayArgs {
    pub fn broker_config(&self) -> BrokerConfig {
        self.broker.clone().into()
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            topics: self.topics.clone().into(),
            bind_addr: self.bind.clone(),
            results_db: self.db.clone(),
            outbound_capacity: self.outbound_capacity,
        }
    }
}

/// Connect to the broker, open the result store, and serve clients until cancelled.
pub async fn run(args: GatewayArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let broker_config = args.broker_config();
    let config = args.gateway_config();

    info!("Starting logrelay gateway");
    info!("  Broker: {} / {}", broker_config.frontend, broker_config.backend);
    info!("  Bind: {}", config.bind_addr);
    info!("  Results: {}", config.results_db.display());

    let broker = ZmqBroker::connect(broker_config)
        .await
        .context("Failed to connect to broker")?;
    let sink = SqliteResultSink::open(&config.results_db)
        .await
        .context("Failed to open result database")?;

    Gateway::new(config, Arc::new(broker), Arc::new(sink))
        .run(cancel)
        .await
}
