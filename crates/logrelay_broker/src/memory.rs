//! In-process broker over a tokio broadcast channel.

use crate::subscription::{BrokerMessage, MessageSource, Subscription};
use crate::{Broker, BrokerError};
use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

const DEFAULT_CAPACITY: usize = 4096;

/// Broker shared by components running in the same process.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct MemoryBroker {
    tx: broadcast::Sender<BrokerMessage>,
}

impl MemoryBroker {
    /// `capacity` bounds how far a subscriber may lag before it loses messages.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        // No receivers is not an error for pub/sub.
        let _ = self.tx.send(BrokerMessage::new(topic, payload));
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<Subscription, BrokerError> {
        Ok(Subscription::spawn(BusReceiver(self.tx.subscribe()), topics.to_vec()))
    }
}

struct BusReceiver(broadcast::Receiver<BrokerMessage>);

#[async_trait]
impl MessageSource for BusReceiver {
    async fn next(&mut self) -> Result<Option<BrokerMessage>, BrokerError> {
        loop {
            match self.0.recv().await {
                Ok(msg) => return Ok(Some(msg)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscription lagged, messages dropped");
                }
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }
}
