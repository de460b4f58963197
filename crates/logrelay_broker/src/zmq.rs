//! ZeroMQ PUB/SUB broker client.
//!
//! Wire format: two frames per message, `[topic, payload]`. Publishers
//! connect a PUB socket to the forwarder's frontend; every subscription opens
//! its own SUB socket on the forwarder's backend.

use crate::subscription::{BrokerMessage, MessageSource, Subscription};
use crate::{Broker, BrokerError};
use async_trait::async_trait;
use logrelay_protocol::BrokerConfig;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeromq::{PubSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

/// How long startup waits for the forwarder before giving up.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ZmqBroker {
    config: BrokerConfig,
    publisher: Mutex<PubSocket>,
}

impl ZmqBroker {
    /// Connect the publishing socket. Fails if the forwarder is unreachable.
    pub async fn connect(config: BrokerConfig) -> Result<Self, BrokerError> {
        Self::connect_with_timeout(config, DEFAULT_CONNECT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        config: BrokerConfig,
        timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let mut publisher = PubSocket::new();
        connect_socket(&mut publisher, &config.frontend, timeout).await?;
        info!(frontend = %config.frontend, backend = %config.backend, "Connected to broker");

        Ok(Self {
            config,
            publisher: Mutex::new(publisher),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

async fn connect_socket<S: Socket>(
    socket: &mut S,
    endpoint: &str,
    timeout: Duration,
) -> Result<(), BrokerError> {
    match tokio::time::timeout(timeout, socket.connect(endpoint)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(BrokerError::Connect {
            endpoint: endpoint.to_string(),
            source,
        }),
        Err(_) => Err(BrokerError::ConnectTimeout {
            endpoint: endpoint.to_string(),
            timeout,
        }),
    }
}

pub(crate) fn pack(topic: &str, payload: Vec<u8>) -> ZmqMessage {
    let mut msg = ZmqMessage::from(topic.as_bytes().to_vec());
    msg.push_back(payload.into());
    msg
}

/// Split a received message into topic and payload frames.
pub(crate) fn unpack(msg: ZmqMessage) -> Option<BrokerMessage> {
    let frames = msg.into_vec();
    if frames.len() < 2 {
        return None;
    }
    let topic = String::from_utf8_lossy(&frames[0]).into_owned();
    Some(BrokerMessage::new(topic, frames[1].to_vec()))
}

#[async_trait]
impl Broker for ZmqBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let msg = pack(topic, payload);
        let mut publisher = self.publisher.lock().await;
        publisher.send(msg).await?;
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<Subscription, BrokerError> {
        let mut socket = SubSocket::new();
        connect_socket(&mut socket, &self.config.backend, DEFAULT_CONNECT_TIMEOUT).await?;
        for topic in topics {
            socket.subscribe(topic).await?;
        }
        debug!(?topics, backend = %self.config.backend, "Subscribed");

        Ok(Subscription::spawn(SubReceiver(socket), topics.to_vec()))
    }
}

struct SubReceiver(SubSocket);

#[async_trait]
impl MessageSource for SubReceiver {
    async fn next(&mut self) -> Result<Option<BrokerMessage>, BrokerError> {
        loop {
            let raw = self.0.recv().await?;
            match unpack(raw) {
                Some(msg) => return Ok(Some(msg)),
                None => warn!("Expected 2 frames [topic, payload], dropping message"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let msg = pack("progress", b"{\"a\":1}".to_vec());
        let unpacked = unpack(msg).unwrap();
        assert_eq!(unpacked.topic, "progress");
        assert_eq!(unpacked.payload, b"{\"a\":1}");
    }

    #[test]
    fn test_unpack_single_frame_rejected() {
        let msg = ZmqMessage::from(b"progress".to_vec());
        assert!(unpack(msg).is_none());
    }
}
