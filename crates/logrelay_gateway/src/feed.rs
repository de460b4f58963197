//! Per-connection broker feed.
//!
//! Each registered connection gets its own subscription to the progress and
//! result topics. Only events carrying the connection's client id are
//! forwarded to the registry; result payloads also go to the result consumer.

use crate::registry::RegistryHandle;
use crate::results::ResultConsumer;
use logrelay_broker::{BrokerMessage, CancellationToken, Subscription};
use logrelay_protocol::{ProgressEvent, ResultEvent, TopicConfig};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct ClientFeed {
    pub client_id: String,
    pub topics: TopicConfig,
    pub registry: RegistryHandle,
    pub consumer: Arc<ResultConsumer>,
}

/// A result addressed to another client is skipped rather than recorded as a
/// mismatch, so one client's feed never overwrites another client's record.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    Deliver,
    DeliverAndRecord,
    /// Unaddressed or unparseable result; recorded as a failure, not shown
    RecordOnly,
    Skip,
}

impl ClientFeed {
    /// Forward matching events until `closed` fires or the subscription ends.
    ///
    /// A subscription that ends on its own cancels `closed` so the
    /// connection does not linger without events.
    pub async fn run(self, mut sub: Subscription, closed: CancellationToken) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = closed.cancelled() => break,
                msg = sub.recv() => msg,
            };
            let Some(msg) = msg else {
                warn!(client_id = %self.client_id, "Broker subscription ended, closing connection");
                closed.cancel();
                break;
            };

            if !self.forward(msg).await {
                closed.cancel();
                break;
            }
        }
        debug!(client_id = %self.client_id, "Feed stopped");
    }

    /// Returns false once the registry is gone.
    async fn forward(&self, msg: BrokerMessage) -> bool {
        let route = self.route(&msg);

        if matches!(route, Route::DeliverAndRecord | Route::RecordOnly) {
            if let Err(e) = self.consumer.handle(&self.client_id, &msg.payload).await {
                error!(client_id = %self.client_id, error = %e, "Failed to record result");
            }
        }

        if matches!(route, Route::Deliver | Route::DeliverAndRecord) {
            let payload = msg.payload_str().into_owned();
            if self.registry.deliver(&self.client_id, payload).await.is_err() {
                return false;
            }
        }
        true
    }

    fn route(&self, msg: &BrokerMessage) -> Route {
        if msg.topic == self.topics.progress {
            match msg.decode::<ProgressEvent>() {
                Ok(event) if event.client_id == self.client_id => Route::Deliver,
                Ok(_) => Route::Skip,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed progress event");
                    Route::Skip
                }
            }
        } else if msg.topic == self.topics.result {
            match msg.decode::<ResultEvent>() {
                Ok(event) => match event.client_id.as_deref() {
                    Some(id) if id == self.client_id => Route::DeliverAndRecord,
                    // Addressed to another client; its own feed records it.
                    Some(_) => Route::Skip,
                    None => Route::RecordOnly,
                },
                Err(_) => Route::RecordOnly,
            }
        } else {
            Route::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Registry, RegistryConfig};
    use crate::sink::{MemoryResultSink, ResultSink};
    use logrelay_protocol::PersistedStatus;

    fn feed(client_id: &str, sink: Arc<MemoryResultSink>) -> ClientFeed {
        let (registry, _task) = Registry::spawn(RegistryConfig::default());
        ClientFeed {
            client_id: client_id.to_string(),
            topics: TopicConfig::default(),
            registry,
            consumer: Arc::new(ResultConsumer::new(sink)),
        }
    }

    fn progress(client_id: &str) -> BrokerMessage {
        let payload = format!(
            r#"{{"client_id":"{}","file_name":"a.log","progress":10,"status":"processing","processed_at":"2025-01-01T00:00:00Z"}}"#,
            client_id
        );
        BrokerMessage::new("progress", payload)
    }

    #[tokio::test]
    async fn test_progress_routed_by_client_id() {
        let feed = feed("A", Arc::new(MemoryResultSink::new()));
        assert_eq!(feed.route(&progress("A")), Route::Deliver);
        assert_eq!(feed.route(&progress("B")), Route::Skip);
        assert_eq!(
            feed.route(&BrokerMessage::new("progress", "garbage")),
            Route::Skip
        );
    }

    #[tokio::test]
    async fn test_result_routes() {
        let feed = feed("A", Arc::new(MemoryResultSink::new()));
        let mine = BrokerMessage::new(
            "result",
            r#"{"client_id":"A","file_path":"x.log","error_count":1,"warn_count":0}"#,
        );
        let theirs = BrokerMessage::new(
            "result",
            r#"{"client_id":"B","file_path":"x.log","error_count":1,"warn_count":0}"#,
        );
        let unaddressed = BrokerMessage::new(
            "result",
            r#"{"file_path":"x.log","error_count":1,"warn_count":0}"#,
        );
        assert_eq!(feed.route(&mine), Route::DeliverAndRecord);
        assert_eq!(feed.route(&theirs), Route::Skip);
        assert_eq!(feed.route(&unaddressed), Route::RecordOnly);
        assert_eq!(
            feed.route(&BrokerMessage::new("result", "nope")),
            Route::RecordOnly
        );
        assert_eq!(feed.route(&BrokerMessage::new("other", "x")), Route::Skip);
    }

    #[tokio::test]
    async fn test_forward_records_and_delivers_own_result() {
        let sink = Arc::new(MemoryResultSink::new());
        let feed = feed("A", sink.clone());
        let mut reg = feed.registry.register("A").await.unwrap();

        let payload = r#"{"client_id":"A","file_path":"up/x.log","error_count":2,"warn_count":1}"#;
        assert!(feed.forward(BrokerMessage::new("result", payload)).await);

        assert_eq!(reg.outbound.recv().await.as_deref(), Some(payload));
        let record = sink.get("x.log").await.unwrap().unwrap();
        assert_eq!(record.status, PersistedStatus::Completed);
        assert_eq!(record.error_count, Some(2));
    }

    #[tokio::test]
    async fn test_forward_records_malformed_result_as_unknown() {
        let sink = Arc::new(MemoryResultSink::new());
        let feed = feed("A", sink.clone());
        assert!(feed.forward(BrokerMessage::new("result", "{oops")).await);

        let record = sink.get("unknown").await.unwrap().unwrap();
        assert_eq!(record.status, PersistedStatus::Failed);
        assert!(record.error.unwrap().contains("{oops"));
    }
}
