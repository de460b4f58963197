use crate::BrokerError;
use async_trait::async_trait;
use logrelay_protocol::ProtocolError;
use std::borrow::Cow;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Buffer between a subscription's receive task and its consumer.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 1024;

/// First pause after a failed receive; doubles up to [`RECV_BACKOFF_MAX`].
pub const RECV_BACKOFF_MIN: Duration = Duration::from_millis(50);
pub const RECV_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Where a subscription's receive task pulls messages from.
///
/// `Ok(None)` means the source is gone for good. `Err` is a transient
/// failure: the task logs it, backs off and asks again.
#[async_trait]
pub trait MessageSource: Send + 'static {
    async fn next(&mut self) -> Result<Option<BrokerMessage>, BrokerError>;
}

/// One message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        logrelay_protocol::decode(&self.topic, &self.payload)
    }

    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// A live subscription.
///
/// Owns the single background task that receives from the broker. Dropping
/// the subscription stops that task.
pub struct Subscription {
    rx: mpsc::Receiver<BrokerMessage>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Spawn the receive task over `source`, keeping only messages whose
    /// topic is exactly one of `topics`.
    pub fn spawn<S: MessageSource>(source: S, topics: Vec<String>) -> Self {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(receive_loop(source, topics, tx));
        Self { rx, task }
    }

    /// Next message, or `None` once the broker side has gone away.
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        self.rx.recv().await
    }
}

async fn receive_loop<S: MessageSource>(
    mut source: S,
    topics: Vec<String>,
    tx: mpsc::Sender<BrokerMessage>,
) {
    let mut backoff = RECV_BACKOFF_MIN;
    loop {
        match source.next().await {
            Ok(Some(msg)) => {
                backoff = RECV_BACKOFF_MIN;
                if !topics.iter().any(|t| *t == msg.topic) {
                    continue;
                }
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!(?topics, "Broker source closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, ?topics, retry_in = ?backoff, "Broker receive failed");
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(RECV_BACKOFF_MAX);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a fixed script of receive outcomes, then closes.
    struct Scripted(VecDeque<Result<Option<BrokerMessage>, BrokerError>>);

    #[async_trait]
    impl MessageSource for Scripted {
        async fn next(&mut self) -> Result<Option<BrokerMessage>, BrokerError> {
            self.0.pop_front().unwrap_or(Ok(None))
        }
    }

    #[tokio::test]
    async fn test_receive_error_does_not_end_subscription() {
        let source = Scripted(VecDeque::from(vec![
            Ok(Some(BrokerMessage::new("progress", "1"))),
            Err(BrokerError::Closed),
            Err(BrokerError::Closed),
            Ok(Some(BrokerMessage::new("progress", "2"))),
        ]));
        let mut sub = Subscription::spawn(source, vec!["progress".to_string()]);

        assert_eq!(sub.recv().await.unwrap().payload, b"1");
        let second = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.payload, b"2");
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_topic_filter_is_exact() {
        let source = Scripted(VecDeque::from(vec![
            Ok(Some(BrokerMessage::new("progress_extra", "x"))),
            Ok(Some(BrokerMessage::new("result", "r"))),
        ]));
        let mut sub = Subscription::spawn(source, vec!["result".to_string()]);
        assert_eq!(sub.recv().await.unwrap().topic, "result");
        assert!(sub.recv().await.is_none());
    }
}
