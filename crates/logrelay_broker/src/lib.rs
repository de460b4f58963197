//! Message broker client.
//!
//! A thin publish/subscribe layer over a shared broker. Payloads are opaque
//! bytes on the wire; [`publish_json`] and [`BrokerMessage::decode`] convert
//! typed protocol events to and from JSON.
//!
//! Two implementations:
//! - [`ZmqBroker`]: ZeroMQ PUB/SUB through a [`Forwarder`] process
//! - [`MemoryBroker`]: in-process, for single-process runs and tests

pub mod args;
pub mod cancel;
pub mod error;
pub mod forwarder;
pub mod memory;
pub mod subscription;
pub mod zmq;

pub use args::{BrokerArgs, TopicArgs};
pub use cancel::CancellationToken;
pub use error::BrokerError;
pub use forwarder::Forwarder;
pub use memory::MemoryBroker;
pub use subscription::{BrokerMessage, MessageSource, Subscription};
pub use zmq::ZmqBroker;

use async_trait::async_trait;

/// Publish/subscribe over named topics.
///
/// Delivery is at-most-once: a message published while nobody is subscribed
/// to its topic is gone.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Open a subscription receiving every message whose topic is exactly one
    /// of `topics`. The subscription is live when this returns.
    async fn subscribe(&self, topics: &[String]) -> Result<Subscription, BrokerError>;
}

/// Serialize `value` as JSON and publish it on `topic`.
pub async fn publish_json<T>(broker: &dyn Broker, topic: &str, value: &T) -> Result<(), BrokerError>
where
    T: serde::Serialize + Sync + ?Sized,
{
    let payload = logrelay_protocol::encode(value)?;
    broker.publish(topic, payload).await
}
