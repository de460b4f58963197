//! Single-file line scanner.
//!
//! Reads the file in fixed-size chunks (never a whole file or a whole line),
//! counts lines carrying the error or warning marker, and reports integer
//! progress through a callback. Progress values for one file are strictly increasing and the
//! last one is always `100 / completed` on success or `error` on failure.

use logrelay_protocol::defaults::{DEFAULT_ERROR_MARKER, DEFAULT_WARN_MARKER};
use logrelay_protocol::{file_base_name, FileScanResult, ProgressStatus};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Highest value a `processing` update may carry; 100 is reserved for `completed`.
const MAX_IN_FLIGHT_PROGRESS: u64 = 99;

// ============================================================================
// Markers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanMarkers {
    pub error: String,
    pub warn: String,
}

impl Default for ScanMarkers {
    fn default() -> Self {
        Self {
            error: DEFAULT_ERROR_MARKER.to_string(),
            warn: DEFAULT_WARN_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Error,
    Warn,
    Other,
}

impl ScanMarkers {
    pub fn new(error: impl Into<String>, warn: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            warn: warn.into(),
        }
    }

    /// Classify one raw line. Error wins when both markers are present.
    pub fn classify(&self, line: &[u8]) -> LineKind {
        if contains(line, self.error.as_bytes()) {
            LineKind::Error
        } else if contains(line, self.warn.as_bytes()) {
            LineKind::Warn
        } else {
            LineKind::Other
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|window| window == needle)
}

/// Classifies a line that arrives in pieces.
///
/// Only the last `longest marker - 1` bytes of the line are kept between
/// pieces, enough to catch a marker split across a chunk boundary.
struct LineMatcher<'m> {
    markers: &'m ScanMarkers,
    keep: usize,
    tail: Vec<u8>,
    error: bool,
    warn: bool,
    open: bool,
}

impl<'m> LineMatcher<'m> {
    fn new(markers: &'m ScanMarkers) -> Self {
        let keep = markers.error.len().max(markers.warn.len()).saturating_sub(1);
        Self {
            markers,
            keep,
            tail: Vec::with_capacity(keep * 2),
            error: false,
            warn: false,
            open: false,
        }
    }

    fn feed(&mut self, piece: &[u8]) {
        if piece.is_empty() {
            return;
        }
        self.open = true;
        if !self.error {
            self.error = self.found(piece, self.markers.error.as_bytes());
        }
        if !self.warn {
            self.warn = self.found(piece, self.markers.warn.as_bytes());
        }

        if piece.len() >= self.keep {
            self.tail.clear();
            self.tail.extend_from_slice(&piece[piece.len() - self.keep..]);
        } else {
            self.tail.extend_from_slice(piece);
            let excess = self.tail.len().saturating_sub(self.keep);
            self.tail.drain(..excess);
        }
    }

    fn found(&self, piece: &[u8], needle: &[u8]) -> bool {
        if contains(piece, needle) {
            return true;
        }
        if needle.len() < 2 || self.tail.is_empty() {
            return false;
        }
        let head = &piece[..piece.len().min(needle.len() - 1)];
        let mut seam = Vec::with_capacity(self.tail.len() + head.len());
        seam.extend_from_slice(&self.tail);
        seam.extend_from_slice(head);
        contains(&seam, needle)
    }

    /// True when bytes have been fed since the last [`finish`](Self::finish).
    fn is_open(&self) -> bool {
        self.open
    }

    fn finish(&mut self) -> LineKind {
        let kind = if self.error {
            LineKind::Error
        } else if self.warn {
            LineKind::Warn
        } else {
            LineKind::Other
        };
        self.tail.clear();
        self.error = false;
        self.warn = false;
        self.open = false;
        kind
    }
}

// ============================================================================
// Progress
// ============================================================================

/// What the scan callback receives. The relay adds client id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub file_name: String,
    pub progress: u8,
    pub status: ProgressStatus,
    pub error: Option<String>,
}

impl ProgressUpdate {
    fn new(file_name: &str, progress: u8, status: ProgressStatus) -> Self {
        Self {
            file_name: file_name.to_string(),
            progress,
            status,
            error: None,
        }
    }
}

/// Dedupes byte-based progress so reported values only ever go up.
struct ProgressTracker {
    file_name: String,
    last: u8,
}

impl ProgressTracker {
    fn new(file_name: String) -> Self {
        Self { file_name, last: 0 }
    }

    fn advance(&mut self, bytes_read: u64, file_size: u64) -> Option<ProgressUpdate> {
        if file_size == 0 {
            return None;
        }
        let pct = (u128::from(bytes_read) * 100 / u128::from(file_size))
            .min(u128::from(MAX_IN_FLIGHT_PROGRESS)) as u8;
        if pct <= self.last {
            return None;
        }
        self.last = pct;
        Some(ProgressUpdate::new(
            &self.file_name,
            pct,
            ProgressStatus::Processing,
        ))
    }

    fn completed(&self) -> ProgressUpdate {
        ProgressUpdate::new(&self.file_name, 100, ProgressStatus::Completed)
    }

    /// Terminal error update. Keeps the last reported value so progress never regresses.
    fn failed(&self, err: &ScanError) -> ProgressUpdate {
        let mut update = ProgressUpdate::new(&self.file_name, self.last, ProgressStatus::Error);
        update.error = Some(err.to_string());
        update
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("File not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to stat {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Read failed for {} after {bytes_read} bytes: {source}", path.display())]
    Read {
        path: PathBuf,
        bytes_read: u64,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Scan
// ============================================================================

/// Scan `path`, reporting progress through `on_progress`.
///
/// On failure the callback has already received a terminal `error` update
/// when this returns.
pub fn scan_file<F>(
    path: &Path,
    markers: &ScanMarkers,
    mut on_progress: F,
) -> Result<FileScanResult, ScanError>
where
    F: FnMut(ProgressUpdate),
{
    let mut tracker = ProgressTracker::new(file_base_name(path));
    match scan_lines(path, markers, &mut tracker, &mut on_progress) {
        Ok(result) => {
            on_progress(tracker.completed());
            Ok(result)
        }
        Err(err) => {
            on_progress(tracker.failed(&err));
            Err(err)
        }
    }
}

fn scan_lines<F>(
    path: &Path,
    markers: &ScanMarkers,
    tracker: &mut ProgressTracker,
    on_progress: &mut F,
) -> Result<FileScanResult, ScanError>
where
    F: FnMut(ProgressUpdate),
{
    let file = File::open(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ScanError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ScanError::Open {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let file_size = file
        .metadata()
        .map_err(|source| ScanError::Stat {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let mut result = FileScanResult::new(path.to_string_lossy());
    let mut matcher = LineMatcher::new(markers);
    let mut bytes_read: u64 = 0;

    loop {
        let chunk = reader.fill_buf().map_err(|source| ScanError::Read {
            path: path.to_path_buf(),
            bytes_read,
            source,
        })?;
        if chunk.is_empty() {
            break;
        }
        let len = chunk.len();

        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            matcher.feed(&rest[..pos]);
            count(&mut result, matcher.finish());
            rest = &rest[pos + 1..];
        }
        matcher.feed(rest);

        reader.consume(len);
        bytes_read += len as u64;
        if let Some(update) = tracker.advance(bytes_read, file_size) {
            on_progress(update);
        }
    }

    // Last line without a trailing newline.
    if matcher.is_open() {
        count(&mut result, matcher.finish());
    }

    Ok(result)
}

fn count(result: &mut FileScanResult, kind: LineKind) {
    match kind {
        LineKind::Error => result.error_count += 1,
        LineKind::Warn => result.warn_count += 1,
        LineKind::Other => {}
    }
}
