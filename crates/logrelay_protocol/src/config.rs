//! Process configuration passed into each component's constructor.
//!
//! Values are resolved once at startup (CLI flags / environment) and are not
//! read from ambient state afterwards.

use crate::defaults::*;
use std::path::PathBuf;

/// Broker endpoints. Publishers connect to `frontend`, subscribers to `backend`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub frontend: String,
    pub backend: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            frontend: DEFAULT_BROKER_FRONTEND.to_string(),
            backend: DEFAULT_BROKER_BACKEND.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub processing: String,
    pub progress: String,
    pub result: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            processing: DEFAULT_PROCESSING_TOPIC.to_string(),
            progress: DEFAULT_PROGRESS_TOPIC.to_string(),
            result: DEFAULT_RESULT_TOPIC.to_string(),
        }
    }
}

/// Processing side: relay server + worker pool.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub topics: TopicConfig,
    /// Fixed worker pool size
    pub workers: usize,
    /// Capacity of the job queue feeding the workers
    pub queue_capacity: usize,
    /// Directory file names in a request are resolved against
    pub upload_dir: PathBuf,
    pub error_marker: String,
    pub warn_marker: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            topics: TopicConfig::default(),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            error_marker: DEFAULT_ERROR_MARKER.to_string(),
            warn_marker: DEFAULT_WARN_MARKER.to_string(),
        }
    }
}

/// Ingestion side: streaming endpoint, connection registry, result sink.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub topics: TopicConfig,
    pub bind_addr: String,
    pub results_db: PathBuf,
    /// Per-connection outbound queue capacity before a client is evicted
    pub outbound_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            topics: TopicConfig::default(),
            bind_addr: DEFAULT_GATEWAY_BIND_ADDR.to_string(),
            results_db: PathBuf::from(DEFAULT_RESULTS_DB),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}
