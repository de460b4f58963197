use thiserror::Error;

/// Payload encoding/decoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload on a topic could not be parsed. Logged and dropped, never retried.
    #[error("Malformed payload on topic '{topic}': {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, ProtocolError::Malformed { .. })
    }
}
