//! Broker protocol for the log relay pipeline.
//!
//! Three topics carry JSON payloads between the ingestion side and the
//! processing side:
//!
//! ```text
//! processing : {"file_names": [..], "client_id": ".."}
//! progress   : {"client_id", "file_name", "progress", "status", "error"?, "processed_at"}
//! result     : {"client_id"?, "file_path", "error_count", "warn_count"}
//! ```
//!
//! Every progress and result event carries the client id of the request that
//! produced it. Delivery is at-most-once.

pub mod config;
pub mod defaults;
pub mod error;
pub mod types;

pub use config::{BrokerConfig, GatewayConfig, RelayConfig, TopicConfig};
pub use error::ProtocolError;
pub use types::{
    file_base_name, FileScanResult, PersistedResult, PersistedStatus, ProcessingRequest,
    ProgressEvent, ProgressStatus, ResultEvent,
};

/// Encode a payload for publishing.
pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(value).map_err(ProtocolError::Encode)
}

/// Decode a payload received on `topic`.
pub fn decode<T: serde::de::DeserializeOwned>(topic: &str, payload: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(payload).map_err(|source| ProtocolError::Malformed {
        topic: topic.to_string(),
        source,
    })
}
