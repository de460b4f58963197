//! Gateway over a real WebSocket, with the in-process broker.

use async_tungstenite::tokio::connect_async;
use async_tungstenite::tungstenite::Message;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use logrelay_broker::{publish_json, Broker, CancellationToken, MemoryBroker};
use logrelay_gateway::{Gateway, MemoryResultSink, RegistryHandle, ResultSink};
use logrelay_protocol::{
    GatewayConfig, PersistedStatus, ProgressEvent, ProgressStatus, ResultEvent, TopicConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct Harness {
    addr: SocketAddr,
    broker: Arc<MemoryBroker>,
    sink: Arc<MemoryResultSink>,
    registry: RegistryHandle,
    topics: TopicConfig,
    cancel: CancellationToken,
    server: JoinHandle<anyhow::Result<()>>,
}

async fn start() -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let broker = Arc::new(MemoryBroker::default());
    let sink = Arc::new(MemoryResultSink::new());
    let config = GatewayConfig::default();
    let topics = config.topics.clone();

    let gateway = Gateway::new(config, broker.clone(), sink.clone());
    let registry = gateway.registry().clone();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(gateway.serve(listener, cancel.clone()));

    Harness {
        addr,
        broker,
        sink,
        registry,
        topics,
        cancel,
        server,
    }
}

async fn wait_registered(registry: &RegistryHandle, n: usize) {
    timeout(Duration::from_secs(5), async {
        while registry.count().await.unwrap() != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("clients never registered");
}

async fn recv_text<S>(ws: &mut S, wait: Duration) -> Option<String>
where
    S: Stream<Item = Result<Message, async_tungstenite::tungstenite::Error>> + Unpin,
{
    match timeout(wait, ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => Some(text),
        _ => None,
    }
}

fn progress(client_id: &str, value: u8) -> ProgressEvent {
    ProgressEvent {
        client_id: client_id.to_string(),
        file_name: "app.log".to_string(),
        progress: value,
        status: ProgressStatus::Processing,
        error: None,
        processed_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_events_reach_only_their_client() {
    let h = start().await;
    let (mut a, _) = connect_async(format!("ws://{}/ws?client_id=A", h.addr))
        .await
        .unwrap();
    let (mut b, _) = connect_async(format!("ws://{}/ws?client_id=B", h.addr))
        .await
        .unwrap();
    wait_registered(&h.registry, 2).await;

    // Feeds subscribe right after registering; keep publishing until both see traffic.
    let mut a_lines: Vec<String> = Vec::new();
    let mut b_lines: Vec<String> = Vec::new();
    for i in 0..50u8 {
        publish_json(h.broker.as_ref(), &h.topics.progress, &progress("A", i))
            .await
            .unwrap();
        publish_json(h.broker.as_ref(), &h.topics.progress, &progress("B", i))
            .await
            .unwrap();

        if a_lines.is_empty() {
            if let Some(text) = recv_text(&mut a, Duration::from_millis(100)).await {
                a_lines.extend(text.lines().map(String::from));
            }
        }
        if b_lines.is_empty() {
            if let Some(text) = recv_text(&mut b, Duration::from_millis(100)).await {
                b_lines.extend(text.lines().map(String::from));
            }
        }
        if !a_lines.is_empty() && !b_lines.is_empty() {
            break;
        }
    }

    assert!(!a_lines.is_empty(), "A never received an event");
    assert!(!b_lines.is_empty(), "B never received an event");
    for line in &a_lines {
        let event: ProgressEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.client_id, "A");
    }
    for line in &b_lines {
        let event: ProgressEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.client_id, "B");
    }

    h.cancel.cancel();
    timeout(Duration::from_secs(5), h.server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_empty_client_id_is_closed() {
    let h = start().await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws?client_id=", h.addr))
        .await
        .unwrap();

    match timeout(Duration::from_secs(2), ws.next()).await {
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => {}
        other => panic!("expected close, got {:?}", other),
    }
    assert_eq!(h.registry.count().await.unwrap(), 0);
    h.cancel.cancel();
}

#[tokio::test]
async fn test_results_are_persisted_last_write_wins() {
    let h = start().await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws?client_id=C1", h.addr))
        .await
        .unwrap();
    wait_registered(&h.registry, 1).await;

    let first = ResultEvent {
        client_id: Some("C1".to_string()),
        file_path: "uploads/app.log".to_string(),
        error_count: 3,
        warn_count: 5,
    };
    let second = ResultEvent {
        error_count: 4,
        ..first.clone()
    };

    for (event, expected_errors) in [(&first, 3u64), (&second, 4u64)] {
        timeout(Duration::from_secs(5), async {
            loop {
                publish_json(h.broker.as_ref(), &h.topics.result, event)
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
                if let Some(record) = h.sink.get("app.log").await.unwrap() {
                    if record.error_count == Some(expected_errors) {
                        break;
                    }
                }
            }
        })
        .await
        .expect("result never persisted");
    }

    let records = h.sink.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, PersistedStatus::Completed);
    assert_eq!(records[0].client_id, "C1");
    assert_eq!((records[0].error_count, records[0].warn_count), (Some(4), Some(5)));

    // The client sees the raw result events too.
    let text = recv_text(&mut ws, Duration::from_secs(2)).await.unwrap();
    let event: ResultEvent = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(event.file_path, "uploads/app.log");

    h.cancel.cancel();
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let h = start().await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws?client_id=Z", h.addr))
        .await
        .unwrap();
    wait_registered(&h.registry, 1).await;

    h.cancel.cancel();
    timeout(Duration::from_secs(5), h.server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "client was not closed on shutdown");
}

#[tokio::test]
async fn test_unaddressed_result_recorded_as_failure() {
    let h = start().await;
    let (_ws, _) = connect_async(format!("ws://{}/ws?client_id=C2", h.addr))
        .await
        .unwrap();
    wait_registered(&h.registry, 1).await;

    timeout(Duration::from_secs(5), async {
        loop {
            h.broker
                .publish(&h.topics.result, b"not json at all".to_vec())
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            if h.sink.get("unknown").await.unwrap().is_some() {
                break;
            }
        }
    })
    .await
    .expect("malformed result never recorded");

    let record = h.sink.get("unknown").await.unwrap().unwrap();
    assert_eq!(record.status, PersistedStatus::Failed);
    assert_eq!(record.client_id, "C2");
    assert!(record.error.unwrap().contains("not json at all"));
    h.cancel.cancel();
}
