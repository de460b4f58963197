//! Relay server end to end over the in-process broker.

use async_trait::async_trait;
use logrelay_broker::{
    publish_json, Broker, BrokerError, BrokerMessage, CancellationToken, MemoryBroker,
    MessageSource, Subscription,
};
use logrelay_protocol::{
    ProcessingRequest, ProgressEvent, ProgressStatus, RelayConfig, ResultEvent, TopicConfig,
};
use logrelay_worker::RelayServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn relay_config(dir: &tempfile::TempDir) -> RelayConfig {
    RelayConfig {
        workers: 2,
        upload_dir: dir.path().to_path_buf(),
        ..RelayConfig::default()
    }
}

async fn next(sub: &mut Subscription) -> BrokerMessage {
    timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for event")
        .expect("subscription closed")
}

/// Collect events until `results` result events have arrived.
async fn collect(sub: &mut Subscription, topics: &TopicConfig, results: usize) -> (Vec<ProgressEvent>, Vec<ResultEvent>) {
    let mut progress = Vec::new();
    let mut result_events = Vec::new();
    while result_events.len() < results {
        let msg = next(sub).await;
        if msg.topic == topics.progress {
            progress.push(msg.decode::<ProgressEvent>().unwrap());
        } else if msg.topic == topics.result {
            result_events.push(msg.decode::<ResultEvent>().unwrap());
        }
    }
    (progress, result_events)
}

#[tokio::test]
async fn test_request_produces_progress_and_results() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.log"), "ERROR a\nERROR b\nERROR c\nWARN d\n").unwrap();
    std::fs::write(dir.path().join("db.log"), "WARN x\nINFO y\n").unwrap();

    let broker = Arc::new(MemoryBroker::default());
    let config = relay_config(&dir);
    let topics = config.topics.clone();
    let mut events = broker
        .subscribe(&[topics.progress.clone(), topics.result.clone()])
        .await
        .unwrap();

    let relay = RelayServer::new(config, broker.clone());
    let sub = relay.subscribe().await.unwrap();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(relay.serve(sub, cancel.clone()));

    // Malformed and incomplete requests are dropped without stalling the loop.
    broker.publish(&topics.processing, b"not json".to_vec()).await.unwrap();
    publish_json(
        broker.as_ref(),
        &topics.processing,
        &ProcessingRequest {
            file_names: vec!["app.log".into()],
            client_id: String::new(),
        },
    )
    .await
    .unwrap();

    publish_json(
        broker.as_ref(),
        &topics.processing,
        &ProcessingRequest {
            file_names: vec!["app.log".into(), "db.log".into(), "gone.log".into()],
            client_id: "20250101120000".into(),
        },
    )
    .await
    .unwrap();

    let (mut progress, results) = collect(&mut events, &topics, 2).await;
    // Let the error event for the missing file land too.
    while !progress.iter().any(|p| p.file_name == "gone.log") {
        let msg = next(&mut events).await;
        if msg.topic == topics.progress {
            progress.push(msg.decode().unwrap());
        }
    }

    assert!(progress.iter().all(|p| p.client_id == "20250101120000"));
    assert!(results
        .iter()
        .all(|r| r.client_id.as_deref() == Some("20250101120000")));

    let app = results.iter().find(|r| r.file_path.ends_with("app.log")).unwrap();
    assert_eq!((app.error_count, app.warn_count), (3, 1));
    let db = results.iter().find(|r| r.file_path.ends_with("db.log")).unwrap();
    assert_eq!((db.error_count, db.warn_count), (0, 1));

    let app_progress: Vec<_> = progress.iter().filter(|p| p.file_name == "app.log").collect();
    assert_eq!(app_progress.last().unwrap().status, ProgressStatus::Completed);
    assert_eq!(app_progress.last().unwrap().progress, 100);

    let gone = progress.iter().find(|p| p.file_name == "gone.log").unwrap();
    assert_eq!(gone.status, ProgressStatus::Error);
    assert!(gone.error.is_some());

    cancel.cancel();
    timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_completed_progress_precedes_result_for_each_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("one.log"), "ERROR\n".repeat(1000)).unwrap();

    let broker = Arc::new(MemoryBroker::default());
    let config = relay_config(&dir);
    let topics = config.topics.clone();
    let mut events = broker
        .subscribe(&[topics.progress.clone(), topics.result.clone()])
        .await
        .unwrap();

    let relay = RelayServer::new(config, broker.clone());
    let totals = relay
        .process_request(ProcessingRequest {
            file_names: vec!["one.log".into()],
            client_id: "c1".into(),
        })
        .await;
    assert_eq!(totals.error_count, 1000);

    // Everything was published before process_request returned.
    let mut order = Vec::new();
    while let Ok(Some(msg)) = timeout(Duration::from_millis(200), events.recv()).await {
        order.push(msg.topic);
    }
    assert_eq!(order.last().map(String::as_str), Some(topics.result.as_str()));
    assert_eq!(order.iter().filter(|t| **t == topics.result).count(), 1);
}

#[tokio::test]
async fn test_cancel_stops_serving() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(MemoryBroker::default());
    let relay = RelayServer::new(relay_config(&dir), broker);
    let cancel = CancellationToken::new();
    cancel.cancel();
    timeout(Duration::from_secs(5), relay.run(cancel))
        .await
        .expect("run should return once cancelled")
        .unwrap();
}

/// Fails `failures` times before handing out queued messages.
struct FlakySource {
    failures: usize,
    rx: mpsc::UnboundedReceiver<BrokerMessage>,
}

#[async_trait]
impl MessageSource for FlakySource {
    async fn next(&mut self) -> Result<Option<BrokerMessage>, BrokerError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(BrokerError::Closed);
        }
        Ok(self.rx.recv().await)
    }
}

#[tokio::test]
async fn test_receive_errors_do_not_stop_serving() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.log"), "ERROR a\nWARN b\n").unwrap();

    let broker = Arc::new(MemoryBroker::default());
    let config = relay_config(&dir);
    let topics = config.topics.clone();
    let mut events = broker
        .subscribe(&[topics.progress.clone(), topics.result.clone()])
        .await
        .unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    let sub = Subscription::spawn(FlakySource { failures: 3, rx }, vec![topics.processing.clone()]);
    let relay = RelayServer::new(config, broker.clone());
    let cancel = CancellationToken::new();
    let server = tokio::spawn(relay.serve(sub, cancel.clone()));

    let request = ProcessingRequest {
        file_names: vec!["app.log".into()],
        client_id: "c1".into(),
    };
    tx.send(BrokerMessage::new(
        topics.processing.clone(),
        logrelay_protocol::encode(&request).unwrap(),
    ))
    .unwrap();

    let (_, results) = collect(&mut events, &topics, 1).await;
    assert_eq!((results[0].error_count, results[0].warn_count), (1, 1));
    assert!(!server.is_finished());

    cancel.cancel();
    timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
}
