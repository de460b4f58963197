//! Relay server: processing requests in, progress and result events out.
//!
//! One subscription on the processing topic. Each request runs as one batch
//! on the worker pool; scan callbacks are funneled through an ordered
//! channel to a single publisher task so per-file event order survives the
//! hop from blocking scan threads to the async broker.

use crate::pool::{PoolConfig, ScanObserver, WorkerPool};
use crate::scanner::ProgressUpdate;
use chrono::Utc;
use logrelay_broker::{publish_json, Broker, BrokerError, BrokerMessage, CancellationToken, Subscription};
use logrelay_protocol::{
    FileScanResult, ProcessingRequest, ProgressEvent, RelayConfig, ResultEvent, TopicConfig,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

enum RelayEvent {
    Progress(ProgressUpdate),
    Result(FileScanResult),
}

struct RelayObserver {
    tx: mpsc::UnboundedSender<RelayEvent>,
}

impl ScanObserver for RelayObserver {
    fn on_progress(&self, update: ProgressUpdate) {
        let _ = self.tx.send(RelayEvent::Progress(update));
    }

    fn on_complete(&self, result: &FileScanResult) {
        let _ = self.tx.send(RelayEvent::Result(result.clone()));
    }
}

/// Counts from one batch's publisher task.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub progress: usize,
    /// Files whose terminal progress event went out
    pub finished: usize,
    pub results: usize,
    pub failed: usize,
}

pub struct RelayServer {
    config: RelayConfig,
    broker: Arc<dyn Broker>,
    pool: WorkerPool,
}

impl RelayServer {
    /// Build the server and start its worker pool. Must be called inside a tokio runtime.
    pub fn new(config: RelayConfig, broker: Arc<dyn Broker>) -> Self {
        let pool = WorkerPool::start(PoolConfig::from(&config));
        Self {
            config,
            broker,
            pool,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Open the processing-topic subscription.
    pub async fn subscribe(&self) -> Result<Subscription, BrokerError> {
        self.broker
            .subscribe(std::slice::from_ref(&self.config.topics.processing))
            .await
    }

    /// Subscribe and serve until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), BrokerError> {
        let sub = self.subscribe().await?;
        self.serve(sub, cancel).await;
        Ok(())
    }

    /// Serve requests from an already-open subscription.
    ///
    /// Cancellation stops intake; a batch that is already running finishes.
    pub async fn serve(self, mut sub: Subscription, cancel: CancellationToken) {
        info!(
            topic = %self.config.topics.processing,
            workers = self.pool.worker_count(),
            "Relay server listening"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Shutdown requested, no longer accepting requests");
                    break;
                }

                msg = sub.recv() => match msg {
                    Some(msg) => self.handle_message(msg).await,
                    None => {
                        warn!("Processing subscription closed");
                        break;
                    }
                }
            }
        }

        drop(sub);
        self.pool.shutdown().await;
        info!("Relay server stopped");
    }

    async fn handle_message(&self, msg: BrokerMessage) {
        let request: ProcessingRequest = match msg.decode() {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, payload = %msg.payload_str(), "Dropping malformed processing request");
                return;
            }
        };

        if request.client_id.is_empty() {
            warn!(files = request.file_names.len(), "Dropping processing request without client id");
            return;
        }
        if request.file_names.is_empty() {
            warn!(client_id = %request.client_id, "Dropping processing request with no files");
            return;
        }

        self.process_request(request).await;
    }

    /// Run one batch and publish its events. Returns the batch totals.
    pub async fn process_request(&self, request: ProcessingRequest) -> FileScanResult {
        let ProcessingRequest {
            file_names,
            client_id,
        } = request;
        info!(client_id = %client_id, files = file_names.len(), "Processing batch");

        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = tokio::spawn(publish_events(
            self.broker.clone(),
            self.config.topics.clone(),
            client_id.clone(),
            rx,
        ));

        let observer: Arc<dyn ScanObserver> = Arc::new(RelayObserver { tx });
        let results = match self.pool.process_batch(&file_names, observer).await {
            Ok(results) => results,
            Err(e) => {
                error!(client_id = %client_id, error = %e, "Batch not processed");
                Vec::new()
            }
        };

        // Finished only once every queued event has gone out.
        match publisher.await {
            Ok(stats) => {
                debug!(
                    client_id = %client_id,
                    progress = stats.progress,
                    results = stats.results,
                    failed = stats.failed,
                    "Batch events published"
                );
                if stats.finished < file_names.len() {
                    warn!(
                        client_id = %client_id,
                        finished = stats.finished,
                        requested = file_names.len(),
                        "Some files ended without a terminal progress event"
                    );
                }
            }
            Err(e) => error!(client_id = %client_id, error = %e, "Publisher task failed"),
        }

        let total = results
            .iter()
            .fold(FileScanResult::new("Total"), |acc, r| acc.merge(r));
        info!(
            client_id = %client_id,
            scanned = results.len(),
            requested = file_names.len(),
            "Total -> errors: {}, warnings: {}",
            total.error_count,
            total.warn_count
        );
        total
    }
}

async fn publish_events(
    broker: Arc<dyn Broker>,
    topics: TopicConfig,
    client_id: String,
    mut rx: mpsc::UnboundedReceiver<RelayEvent>,
) -> PublishStats {
    let mut stats = PublishStats::default();

    while let Some(event) = rx.recv().await {
        let published = match event {
            RelayEvent::Progress(update) => {
                stats.progress += 1;
                if update.status.is_terminal() {
                    stats.finished += 1;
                }
                let event = ProgressEvent {
                    client_id: client_id.clone(),
                    file_name: update.file_name,
                    progress: update.progress,
                    status: update.status,
                    error: update.error,
                    processed_at: Utc::now(),
                };
                publish_json(broker.as_ref(), &topics.progress, &event).await
            }
            RelayEvent::Result(result) => {
                stats.results += 1;
                let event = ResultEvent::from_scan(&client_id, &result);
                publish_json(broker.as_ref(), &topics.result, &event).await
            }
        };

        if let Err(e) = published {
            stats.failed += 1;
            warn!(client_id = %client_id, error = %e, "Failed to publish event");
        }
    }

    stats
}
