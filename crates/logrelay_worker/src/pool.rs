//! Fixed-size worker pool.
//!
//! N long-lived tasks pull jobs from one bounded queue. A batch submits one
//! job per file and then waits on its own completion channel until every
//! file has reported an outcome, so one failed file never blocks or cancels
//! the rest.

use crate::scanner::{scan_file, ProgressUpdate, ScanMarkers};
use logrelay_protocol::defaults::{DEFAULT_QUEUE_CAPACITY, DEFAULT_UPLOAD_DIR, DEFAULT_WORKERS};
use logrelay_protocol::{FileScanResult, RelayConfig};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Receives scan callbacks from worker tasks.
///
/// `on_progress` is called from a blocking thread; implementations must not block.
pub trait ScanObserver: Send + Sync {
    fn on_progress(&self, update: ProgressUpdate);

    /// Called once per successfully scanned file, after its final progress update.
    fn on_complete(&self, _result: &FileScanResult) {}
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// File names in a batch are resolved against this directory
    pub upload_dir: PathBuf,
    pub markers: ScanMarkers,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            markers: ScanMarkers::default(),
        }
    }
}

impl From<&RelayConfig> for PoolConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            upload_dir: config.upload_dir.clone(),
            markers: ScanMarkers::new(config.error_marker.clone(), config.warn_marker.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker pool is shut down")]
    Closed,
}

struct ScanJob {
    file_name: String,
    path: PathBuf,
    observer: Arc<dyn ScanObserver>,
    done: mpsc::UnboundedSender<JobOutcome>,
}

enum JobOutcome {
    Scanned(FileScanResult),
    Failed,
}

pub struct WorkerPool {
    jobs: Option<mpsc::Sender<ScanJob>>,
    workers: Vec<JoinHandle<()>>,
    upload_dir: PathBuf,
}

impl WorkerPool {
    /// Spawn the worker tasks. Must be called inside a tokio runtime.
    pub fn start(config: PoolConfig) -> Self {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let queue = Arc::new(Mutex::new(rx));
        let markers = Arc::new(config.markers);

        let handles = (0..workers)
            .map(|id| tokio::spawn(worker_loop(id, queue.clone(), markers.clone())))
            .collect();

        info!(
            workers,
            queue_capacity = config.queue_capacity,
            upload_dir = %config.upload_dir.display(),
            "Worker pool started"
        );

        Self {
            jobs: Some(tx),
            workers: handles,
            upload_dir: config.upload_dir,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Scan every file in `file_names` and return the results of those that succeeded.
    ///
    /// Returns once every submitted file has been attempted. Result order
    /// follows completion, not submission.
    pub async fn process_batch(
        &self,
        file_names: &[String],
        observer: Arc<dyn ScanObserver>,
    ) -> Result<Vec<FileScanResult>, PoolError> {
        let jobs = self.jobs.as_ref().ok_or(PoolError::Closed)?;
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let mut submitted = 0usize;
        for file_name in file_names {
            let job = ScanJob {
                file_name: file_name.clone(),
                path: self.upload_dir.join(file_name),
                observer: observer.clone(),
                done: done_tx.clone(),
            };
            if jobs.send(job).await.is_err() {
                error!(file = %file_name, "Job queue closed mid-batch");
                break;
            }
            submitted += 1;
        }
        drop(done_tx);
        drop(observer);

        let mut results = Vec::with_capacity(submitted);
        let mut reported = 0usize;
        while reported < submitted {
            match done_rx.recv().await {
                Some(JobOutcome::Scanned(result)) => results.push(result),
                Some(JobOutcome::Failed) => {}
                // Every job sender is gone; nothing further can report.
                None => break,
            }
            reported += 1;
        }

        if reported < submitted {
            warn!(submitted, reported, "Batch ended before every file reported");
        }
        Ok(results)
    }

    /// Close the queue and wait for workers to drain it.
    pub async fn shutdown(mut self) {
        self.jobs.take();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                error!("Worker task failed to join: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(id: usize, queue: Arc<Mutex<mpsc::Receiver<ScanJob>>>, markers: Arc<ScanMarkers>) {
    debug!(worker = id, "Worker started");
    loop {
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };
        run_job(id, job, markers.clone()).await;
    }
    debug!(worker = id, "Worker exiting");
}

async fn run_job(worker: usize, job: ScanJob, markers: Arc<ScanMarkers>) {
    let ScanJob {
        file_name,
        path,
        observer,
        done,
    } = job;

    let scan_observer = observer.clone();
    let joined = tokio::task::spawn_blocking(move || {
        scan_file(&path, &markers, |update| scan_observer.on_progress(update))
    })
    .await;

    let outcome = match joined {
        Ok(Ok(result)) => {
            observer.on_complete(&result);
            info!(worker, "{}", result);
            JobOutcome::Scanned(result)
        }
        Ok(Err(e)) => {
            warn!(worker, file = %file_name, error = %e, "Scan failed");
            JobOutcome::Failed
        }
        Err(e) => {
            error!(worker, file = %file_name, error = %e, "Scan task panicked");
            JobOutcome::Failed
        }
    };

    // The batch may have been abandoned; nobody left to tell.
    let _ = done.send(outcome);
}
