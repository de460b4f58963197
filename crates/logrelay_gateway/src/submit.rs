//! Ingestion boundary: turn a list of uploaded file names into a processing request.

use chrono::Utc;
use logrelay_broker::{publish_json, Broker, BrokerError};
use logrelay_protocol::ProcessingRequest;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("No valid files to process")]
    NoValidFiles,

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Names that are safe to resolve inside `upload_dir` and exist there.
///
/// Returns `(accepted, rejected)`, each in input order.
pub fn validate_file_names(upload_dir: &Path, file_names: &[String]) -> (Vec<String>, Vec<String>) {
    file_names.iter().cloned().partition(|name| {
        !name.is_empty()
            && !name.contains("..")
            && !name.contains('/')
            && !name.contains('\\')
            && upload_dir.join(name).is_file()
    })
}

/// Client id for a new batch: the current UTC time as `YYYYMMDDHHMMSS`.
pub fn generate_client_id() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Validate `file_names` and publish a processing request for the survivors.
pub async fn submit(
    broker: &dyn Broker,
    topic: &str,
    upload_dir: &Path,
    file_names: &[String],
    client_id: Option<String>,
) -> Result<ProcessingRequest, SubmitError> {
    let (accepted, rejected) = validate_file_names(upload_dir, file_names);
    if !rejected.is_empty() {
        warn!(?rejected, "Skipping invalid file names");
    }
    if accepted.is_empty() {
        return Err(SubmitError::NoValidFiles);
    }

    let request = ProcessingRequest {
        file_names: accepted,
        client_id: client_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_client_id),
    };
    publish_json(broker, topic, &request).await?;
    info!(client_id = %request.client_id, files = request.file_names.len(), "Processing request published");
    Ok(request)
}
