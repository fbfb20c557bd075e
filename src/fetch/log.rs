//! Per-request observability records in CSV form.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use super::FetchOutcome;
use crate::config::FetchConfig;
use crate::error::Result;
use crate::lock::FETCH_LOG_LOCK_TIMEOUT;
use crate::output::{append_record, csv_line};
use crate::query::{Query, TransportType, Way};

pub const FETCH_LOG_COLUMNS: &str = "actual_date,transport_type,line_code,stop_code,way,\
resp_time,resp_status,resp_length,timeout,connection_error,max_connections,timeout_time";

/// One fetch-log line. Field order is the column order.
///
/// Booleans are written `True`/`False` and missing values `None`, matching
/// logs collected by earlier versions of the poller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchRecord {
    pub actual_date: String,
    pub transport_type: TransportType,
    pub line_code: String,
    pub stop_code: String,
    pub way: Way,
    /// Seconds from request start to outcome.
    pub resp_time: f64,
    #[serde(serialize_with = "none_literal")]
    pub resp_status: Option<u16>,
    #[serde(serialize_with = "none_literal")]
    pub resp_length: Option<usize>,
    #[serde(serialize_with = "title_case_bool")]
    pub timeout: bool,
    #[serde(serialize_with = "title_case_bool")]
    pub connection_error: bool,
    pub max_connections: usize,
    pub timeout_time: u64,
}

impl FetchRecord {
    pub fn new(
        started_at: DateTime<Local>,
        query: &Query,
        outcome: &FetchOutcome,
        config: &FetchConfig,
    ) -> Self {
        Self {
            actual_date: started_at.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            transport_type: query.transport_type,
            line_code: query.line_code.clone(),
            stop_code: query.station_name.clone(),
            way: query.way,
            resp_time: outcome.elapsed().as_secs_f64(),
            resp_status: outcome.status(),
            resp_length: outcome.length(),
            timeout: matches!(outcome, FetchOutcome::Timeout { .. }),
            connection_error: matches!(outcome, FetchOutcome::ConnectionError { .. }),
            max_connections: config.max_connections,
            timeout_time: config.timeout.as_secs(),
        }
    }
}

fn none_literal<T: Display, S: Serializer>(
    value: &Option<T>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_str("None"),
    }
}

fn title_case_bool<S: Serializer>(
    value: &bool,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(if *value { "True" } else { "False" })
}

/// Appends `record` to the fetch log at `path` under its lock.
pub fn append_fetch_record(path: &Path, record: &FetchRecord) -> Result<()> {
    let line = csv_line(record)?;
    debug!(line = %line, "CSV fetch log line");
    append_record(path, Some(FETCH_LOG_COLUMNS), &line, FETCH_LOG_LOCK_TIMEOUT)
}

/// Writes `record` off the async executor.
///
/// Failures are logged and swallowed: the fetch this record describes has
/// already completed and its outcome stands.
pub async fn log_fetch(path: PathBuf, record: FetchRecord) {
    let result =
        tokio::task::spawn_blocking(move || append_fetch_record(&path, &record)).await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to write fetch log"),
        Err(e) => warn!(error = %e, "Fetch log task failed"),
    }
}
