//! Payload types carried on the broker topics, plus the persisted result record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// Status Enums
// ============================================================================

/// Status carried by a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Processing,
    Completed,
    Error,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Processing => "processing",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Error => "error",
        }
    }

    /// Completed and Error end a file's event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Error)
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a persisted result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistedStatus {
    Completed,
    Failed,
}

impl PersistedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistedStatus::Completed => "completed",
            PersistedStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PersistedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PersistedStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completed" => Ok(PersistedStatus::Completed),
            "failed" => Ok(PersistedStatus::Failed),
            _ => Err(format!(
                "Invalid result status: '{}'. Expected: completed or failed",
                s
            )),
        }
    }
}

// ============================================================================
// Topic Payloads
// ============================================================================

/// Batch request published on the processing topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingRequest {
    pub file_names: Vec<String>,
    pub client_id: String,
}

/// Per-file progress published on the progress topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub client_id: String,
    pub file_name: String,
    /// Percentage in 0..=100
    pub progress: u8,
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// Counts for one successfully scanned file.
///
/// Merging is a plain sum of counts, so it is associative and commutative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileScanResult {
    pub file_path: String,
    pub error_count: u64,
    pub warn_count: u64,
}

impl FileScanResult {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            error_count: 0,
            warn_count: 0,
        }
    }

    /// Sum counts; keeps `self.file_path`.
    pub fn merge(mut self, other: &FileScanResult) -> Self {
        self += other;
        self
    }
}

impl AddAssign<&FileScanResult> for FileScanResult {
    fn add_assign(&mut self, other: &FileScanResult) {
        self.error_count += other.error_count;
        self.warn_count += other.warn_count;
    }
}

impl fmt::Display for FileScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "File: {}, Error Count: {}, Warn Count: {}",
            self.file_path, self.error_count, self.warn_count
        )
    }
}

/// Terminal per-file event published on the result topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub file_path: String,
    pub error_count: u64,
    pub warn_count: u64,
}

impl ResultEvent {
    pub fn from_scan(client_id: &str, result: &FileScanResult) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            file_path: result.file_path.clone(),
            error_count: result.error_count,
            warn_count: result.warn_count,
        }
    }
}

// ============================================================================
// Persisted Record
// ============================================================================

/// Result record written to the result sink, keyed by `file_name`.
///
/// Upserts overwrite: the last write for a file name wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedResult {
    pub file_name: String,
    pub client_id: String,
    pub status: PersistedStatus,
    pub warn_count: Option<u64>,
    pub error_count: Option<u64>,
    pub error: Option<String>,
}

impl PersistedResult {
    pub fn completed(
        file_name: impl Into<String>,
        client_id: impl Into<String>,
        error_count: u64,
        warn_count: u64,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            client_id: client_id.into(),
            status: PersistedStatus::Completed,
            warn_count: Some(warn_count),
            error_count: Some(error_count),
            error: None,
        }
    }

    pub fn failed(
        file_name: impl Into<String>,
        client_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            client_id: client_id.into(),
            status: PersistedStatus::Failed,
            warn_count: None,
            error_count: None,
            error: Some(error.into()),
        }
    }
}

/// Last path component of `path`, or `path` itself if it has none.
pub fn file_base_name(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
