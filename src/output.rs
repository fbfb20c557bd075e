//! Append-only output files shared between concurrent writers.
//!
//! Every write takes the file's advisory lock first and checks for the file
//! while holding it, so two writers can never both emit a header.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use csv::WriterBuilder;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::lock::{FileLock, OUTPUT_LOCK_TIMEOUT};

/// Header of the parsed CSV output.
pub const GSTBP_CSV_COLUMNS: &str = "actual_date,query,remaining_minutes,destination_stop";

/// What a batch cycle writes to its output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One raw JSON response body per line, no header.
    Raw,
    /// Parsed schedule rows as CSV.
    Parsed,
}

impl OutputMode {
    pub fn header(&self) -> Option<&'static str> {
        match self {
            OutputMode::Raw => None,
            OutputMode::Parsed => Some(GSTBP_CSV_COLUMNS),
        }
    }
}

/// Appends `payload` to `path`.
///
/// A new file gets `header` (if any) on its own line before the payload; an
/// existing file gets a `\n` separator first.
pub fn append_record(
    path: &Path,
    header: Option<&str>,
    payload: &str,
    lock_timeout: Duration,
) -> Result<()> {
    let _lock = FileLock::acquire(path, lock_timeout)?;

    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending record");

    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    if file_exists {
        file.write_all(b"\n")?;
    } else if let Some(header) = header {
        file.write_all(header.as_bytes())?;
        file.write_all(b"\n")?;
    }
    file.write_all(payload.as_bytes())?;
    file.flush()?;

    Ok(())
}

/// Creates `path` holding only `header` unless it already exists.
///
/// Returns whether the file was created.
pub fn ensure_header(path: &Path, header: &str, lock_timeout: Duration) -> Result<bool> {
    let _lock = FileLock::acquire(path, lock_timeout)?;

    if path.exists() {
        return Ok(false);
    }

    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    file.write_all(header.as_bytes())?;
    file.flush()?;
    debug!(path = %path.display(), "Output header written");

    Ok(true)
}

/// Serializes one value as a single CSV line without a header or terminator.
pub fn csv_line<T: Serialize>(record: &T) -> Result<String> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.serialize(record)?;
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;

    Ok(String::from_utf8_lossy(&bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string())
}

/// Appends one batch's lines to `path` as a single newline-joined record.
pub fn write_batch(path: &Path, mode: OutputMode, lines: &[String]) -> Result<()> {
    if lines.is_empty() {
        debug!(path = %path.display(), "Nothing to write for this batch");
        return Ok(());
    }
    append_record(path, mode.header(), &lines.join("\n"), OUTPUT_LOCK_TIMEOUT)
}
