//! The shared broker process: a SUB/PUB forwarder.
//!
//! Publishers connect to the frontend (a bound SUB socket subscribed to
//! everything); subscribers connect to the backend (a bound PUB socket).
//! Topic filtering happens at the subscribers.

use crate::cancel::CancellationToken;
use crate::subscription::{RECV_BACKOFF_MAX, RECV_BACKOFF_MIN};
use crate::BrokerError;
use logrelay_protocol::BrokerConfig;
use tracing::{debug, info, warn};
use zeromq::{PubSocket, Socket, SocketRecv, SocketSend, SubSocket};

pub struct Forwarder {
    frontend: SubSocket,
    backend: PubSocket,
    config: BrokerConfig,
}

impl Forwarder {
    /// Bind both endpoints. Clients may connect once this returns.
    pub async fn bind(config: BrokerConfig) -> Result<Self, BrokerError> {
        let mut frontend = SubSocket::new();
        frontend
            .bind(&config.frontend)
            .await
            .map_err(|source| BrokerError::Bind {
                endpoint: config.frontend.clone(),
                source,
            })?;
        frontend.subscribe("").await?;

        let mut backend = PubSocket::new();
        backend
            .bind(&config.backend)
            .await
            .map_err(|source| BrokerError::Bind {
                endpoint: config.backend.clone(),
                source,
            })?;

        info!(frontend = %config.frontend, backend = %config.backend, "Broker forwarder bound");
        Ok(Self {
            frontend,
            backend,
            config,
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Copy messages from frontend to backend until cancelled.
    ///
    /// Returns the number of messages forwarded.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<u64, BrokerError> {
        let mut forwarded: u64 = 0;
        let mut backoff = RECV_BACKOFF_MIN;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(forwarded, "Broker forwarder stopping");
                    break;
                }

                recv = self.frontend.recv() => {
                    let msg = match recv {
                        Ok(msg) => {
                            backoff = RECV_BACKOFF_MIN;
                            msg
                        }
                        Err(e) => {
                            warn!(error = %e, retry_in = ?backoff, "Frontend receive failed");
                            tokio::select! {
                                _ = cancel.cancelled() => {}
                                _ = tokio::time::sleep(backoff) => {}
                            }
                            backoff = (backoff * 2).min(RECV_BACKOFF_MAX);
                            continue;
                        }
                    };
                    match self.backend.send(msg).await {
                        Ok(()) => {
                            forwarded += 1;
                            if forwarded % 10_000 == 0 {
                                debug!(forwarded, "Forwarder progress");
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to forward message"),
                    }
                }
            }
        }
        Ok(forwarded)
    }
}
