//! `logrelay start`: forwarder, relay and gateway in one process.
//!
//! Components still talk over ZeroMQ, so an external `logrelay submit`
//! (or a separate worker) can join the same broker.

use anyhow::{Context, Result};
use logrelay_broker::{BrokerArgs, CancellationToken, Forwarder, TopicArgs, ZmqBroker};
use logrelay_gateway::{Gateway, SqliteResultSink};
use logrelay_protocol::defaults::{
    DEFAULT_ERROR_MARKER, DEFAULT_GATEWAY_BIND_ADDR, DEFAULT_OUTBOUND_CAPACITY,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_RESULTS_DB, DEFAULT_UPLOAD_DIR, DEFAULT_WARN_MARKER,
    DEFAULT_WORKERS,
};
use logrelay_protocol::{BrokerConfig, GatewayConfig, RelayConfig, TopicConfig};
use logrelay_worker::RelayServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(clap::Args, Debug, Clone)]
pub struct StartArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    #[command(flatten)]
    pub topics: TopicArgs,

    #[arg(long, env = "LOGRELAY_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    #[arg(long, env = "LOGRELAY_UPLOAD_DIR", default_value = DEFAULT_UPLOAD_DIR)]
    pub upload_dir: PathBuf,

    #[arg(long, env = "LOGRELAY_BIND", default_value = DEFAULT_GATEWAY_BIND_ADDR)]
    pub bind: String,

    #[arg(long, env = "LOGRELAY_DB", default_value = DEFAULT_RESULTS_DB)]
    pub db: PathBuf,
}

pub async fn run(args: StartArgs, cancel: CancellationToken) -> Result<()> {
    let broker_config: BrokerConfig = args.broker.clone().into();
    let topics: TopicConfig = args.topics.clone().into();

    std::fs::create_dir_all(&args.upload_dir)
        .with_context(|| format!("Failed to create {}", args.upload_dir.display()))?;

    info!("Starting logrelay stack");
    info!("  Broker: {} / {}", broker_config.frontend, broker_config.backend);
    info!("  Upload dir: {}", args.upload_dir.display());
    info!("  Bind: {}", args.bind);
    info!("  Results: {}", args.db.display());

    // The forwarder outlives the relay so a draining batch can still publish.
    let broker_cancel = CancellationToken::new();
    let forwarder = Forwarder::bind(broker_config.clone())
        .await
        .context("Failed to bind broker endpoints")?;
    let forwarder_task = tokio::spawn(forwarder.run(broker_cancel.clone()));

    let relay_broker = ZmqBroker::connect(broker_config.clone())
        .await
        .context("Relay failed to connect to broker")?;
    let gateway_broker = ZmqBroker::connect(broker_config)
        .await
        .context("Gateway failed to connect to broker")?;
    let sink = SqliteResultSink::open(&args.db)
        .await
        .context("Failed to open result database")?;

    let relay = RelayServer::new(
        RelayConfig {
            topics: topics.clone(),
            workers: args.workers,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            upload_dir: args.upload_dir.clone(),
            error_marker: DEFAULT_ERROR_MARKER.to_string(),
            warn_marker: DEFAULT_WARN_MARKER.to_string(),
        },
        Arc::new(relay_broker),
    );
    let gateway = Gateway::new(
        GatewayConfig {
            topics,
            bind_addr: args.bind.clone(),
            results_db: args.db.clone(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        },
        Arc::new(gateway_broker),
        Arc::new(sink),
    );

    let relay_task = tokio::spawn(relay.run(cancel.clone()));
    let gateway_result = gateway.run(cancel.clone()).await;
    if let Err(e) = &gateway_result {
        error!("Gateway failed: {:#}", e);
    }
    // A gateway failure takes the rest down with it.
    cancel.cancel();

    match relay_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Relay failed: {}", e),
        Err(e) => error!("Relay task failed: {}", e),
    }

    broker_cancel.cancel();
    match forwarder_task.await {
        Ok(Ok(forwarded)) => info!(forwarded, "Broker stopped"),
        Ok(Err(e)) => error!("Broker failed: {}", e),
        Err(e) => error!("Broker task failed: {}", e),
    }

    gateway_result
}
