//! Canonical default values shared by the relay and the gateway.

pub const DEFAULT_BROKER_FRONTEND: &str = "tcp://127.0.0.1:5560";
pub const DEFAULT_BROKER_BACKEND: &str = "tcp://127.0.0.1:5561";
pub const DEFAULT_PROCESSING_TOPIC: &str = "processing";
pub const DEFAULT_PROGRESS_TOPIC: &str = "progress";
pub const DEFAULT_RESULT_TOPIC: &str = "result";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_GATEWAY_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_RESULTS_DB: &str = "logrelay.sqlite";
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;
pub const DEFAULT_ERROR_MARKER: &str = "ERROR";
pub const DEFAULT_WARN_MARKER: &str = "WARN";
/// File name recorded when a result payload cannot be parsed.
pub const UNKNOWN_FILE_NAME: &str = "unknown";
/// Bound on the registry's command queue.
pub const DEFAULT_CONTROL_CAPACITY: usize = 1024;
