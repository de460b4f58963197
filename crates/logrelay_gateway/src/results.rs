//! Turns result-topic payloads into persisted result records.

use crate::sink::{ResultSink, SinkError};
use logrelay_protocol::defaults::UNKNOWN_FILE_NAME;
use logrelay_protocol::{file_base_name, PersistedResult, ResultEvent};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ResultConsumer {
    sink: Arc<dyn ResultSink>,
}

impl ResultConsumer {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn ResultSink> {
        &self.sink
    }

    /// Map a raw result payload to the record it should produce.
    ///
    /// - matching client id: `completed` with both counts
    /// - other or missing client id: `failed` for that file
    /// - unparseable: `failed` under [`UNKNOWN_FILE_NAME`] with the raw payload
    pub fn interpret(expected_client_id: &str, payload: &[u8]) -> PersistedResult {
        let event: ResultEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(err) => {
                let raw = String::from_utf8_lossy(payload);
                return PersistedResult::failed(
                    UNKNOWN_FILE_NAME,
                    expected_client_id,
                    format!("Failed to parse result message: {}. Raw message: {}", err, raw),
                );
            }
        };

        let file_name = file_base_name(&event.file_path);
        match event.client_id.as_deref() {
            Some(id) if id == expected_client_id => PersistedResult::completed(
                file_name,
                expected_client_id,
                event.error_count,
                event.warn_count,
            ),
            other => PersistedResult::failed(
                file_name,
                expected_client_id,
                format!(
                    "Result message client ID {} does not match current client ID {}",
                    other.unwrap_or("<none>"),
                    expected_client_id
                ),
            ),
        }
    }

    /// Interpret `payload` and upsert the resulting record.
    pub async fn handle(
        &self,
        expected_client_id: &str,
        payload: &[u8],
    ) -> Result<PersistedResult, SinkError> {
        let record = Self::interpret(expected_client_id, payload);
        if record.error.is_some() {
            warn!(
                client_id = %expected_client_id,
                file = %record.file_name,
                error = record.error.as_deref().unwrap_or_default(),
                "Recording failed result"
            );
        } else {
            debug!(client_id = %expected_client_id, file = %record.file_name, "Recording result");
        }
        self.sink.upsert(&record).await?;
        Ok(record)
    }
}
