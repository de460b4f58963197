//! Streaming endpoint: accept loop over TCP, one task per connection.

use crate::connection::{handle_connection, ConnectionContext};
use crate::registry::{Registry, RegistryConfig, RegistryHandle};
use crate::results::ResultConsumer;
use crate::sink::ResultSink;
use anyhow::{Context, Result};
use logrelay_broker::{Broker, CancellationToken};
use logrelay_protocol::defaults::DEFAULT_CONTROL_CAPACITY;
use logrelay_protocol::GatewayConfig;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct Gateway {
    config: GatewayConfig,
    ctx: Arc<ConnectionContext>,
    registry_task: JoinHandle<()>,
}

impl Gateway {
    /// Start the connection registry. Must be called inside a tokio runtime.
    pub fn new(config: GatewayConfig, broker: Arc<dyn Broker>, sink: Arc<dyn ResultSink>) -> Self {
        let (registry, registry_task) = Registry::spawn(RegistryConfig {
            outbound_capacity: config.outbound_capacity,
            control_capacity: DEFAULT_CONTROL_CAPACITY,
        });
        let ctx = Arc::new(ConnectionContext {
            broker,
            topics: config.topics.clone(),
            registry,
            consumer: Arc::new(ResultConsumer::new(sink)),
        });
        Self {
            config,
            ctx,
            registry_task,
        }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.ctx.registry
    }

    /// Bind the configured address and serve until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind_addr))?;
        self.serve(listener, cancel).await
    }

    /// Accept connections on `listener` until cancelled, then close them all.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let addr = listener.local_addr().context("Listener has no local address")?;
        info!(%addr, "Gateway listening");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Shutdown requested, closing connections");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = self.ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, ctx).await {
                                debug!(%peer, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                }
            }
        }

        self.ctx.registry.shutdown().await;
        if let Err(e) = self.registry_task.await {
            warn!(error = %e, "Registry task failed");
        }
        self.ctx.consumer.sink().close().await;
        info!("Gateway stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SqliteResultSink;
    use logrelay_broker::MemoryBroker;
    use logrelay_protocol::PersistedResult;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_closes_registry_and_sink() {
        let sink = Arc::new(SqliteResultSink::open_in_memory().await.unwrap());
        let gateway = Gateway::new(
            GatewayConfig::default(),
            Arc::new(MemoryBroker::default()),
            sink.clone(),
        );
        let registry = gateway.registry().clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), gateway.serve(listener, cancel))
            .await
            .unwrap()
            .unwrap();

        assert!(registry.register("late").await.is_err());
        assert!(sink
            .upsert(&PersistedResult::completed("late.log", "late", 0, 0))
            .await
            .is_err());
    }
}
