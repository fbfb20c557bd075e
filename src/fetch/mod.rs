//! Fetching schedules from the upstream API.
//!
//! [`fetch`] issues one request and classifies what happened; [`batch`] fans
//! many of them out under a shared connection budget.

mod basic;
pub mod batch;
mod client;
pub mod log;
pub mod mock;

pub use basic::BasicClient;
pub use batch::{BatchResult, get_stop_times, get_stop_times_with, run_batch, run_batch_with};
pub use client::{HttpClient, HttpResponse};

use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::FetchConfig;
use crate::error::TransportError;
use crate::query::Query;

use self::log::{FetchRecord, log_fetch};

/// What happened to one request. Exactly one variant per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A response arrived, whatever its HTTP status.
    Success {
        body: String,
        status: u16,
        length: usize,
        elapsed: Duration,
    },
    Timeout {
        elapsed: Duration,
    },
    ConnectionError {
        elapsed: Duration,
    },
}

impl FetchOutcome {
    pub fn elapsed(&self) -> Duration {
        match self {
            FetchOutcome::Success { elapsed, .. }
            | FetchOutcome::Timeout { elapsed }
            | FetchOutcome::ConnectionError { elapsed } => *elapsed,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchOutcome::Success { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn length(&self) -> Option<usize> {
        match self {
            FetchOutcome::Success { length, .. } => Some(*length),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }

    pub fn into_body(self) -> Option<String> {
        match self {
            FetchOutcome::Success { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// `{api_base}/{transport_type}/{line_code}/{station_name}/{way}`, each
/// segment percent-encoded.
pub fn build_url(api_base: &str, query: &Query) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        api_base.trim_end_matches('/'),
        urlencoding::encode(query.transport_type.as_str()),
        urlencoding::encode(&query.line_code),
        urlencoding::encode(&query.station_name),
        urlencoding::encode(query.way.as_str()),
    )
}

/// Fetches the schedule for `query`.
///
/// Never fails: transport problems become [`FetchOutcome::Timeout`] or
/// [`FetchOutcome::ConnectionError`]. When `config.fetch_log` is set, one
/// record is appended to it before returning.
pub async fn fetch<C: HttpClient + ?Sized>(
    client: &C,
    query: &Query,
    config: &FetchConfig,
) -> FetchOutcome {
    fetch_gated(client, query, config, None).await
}

/// Like [`fetch`], first waiting for a permit from `slots` when given.
///
/// The deadline and the recorded start time cover the wait for a slot, so
/// a request queued behind a full pool can time out before it is sent.
#[tracing::instrument(
    skip(client, config, slots),
    fields(
        transport_type = %query.transport_type,
        line_code = %query.line_code,
        station = %query.station_name,
        way = %query.way,
    )
)]
pub async fn fetch_gated<C: HttpClient + ?Sized>(
    client: &C,
    query: &Query,
    config: &FetchConfig,
    slots: Option<&Semaphore>,
) -> FetchOutcome {
    let url = build_url(&config.api_base, query);
    let started_at = Local::now();
    let start = Instant::now();

    let request = async {
        let _permit = match slots {
            Some(slots) => match slots.acquire().await {
                Ok(permit) => Some(permit),
                Err(_) => return Err(TransportError::Connection("connection pool closed".into())),
            },
            None => None,
        };
        client.get(&url).await
    };

    let result = match tokio::time::timeout(config.timeout, request).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    };
    let elapsed = start.elapsed();

    let outcome = match result {
        Ok(resp) => {
            let length = resp.body.len();
            info!(
                resp_time = elapsed.as_secs_f64(),
                status = resp.status,
                length,
                "Response received"
            );
            FetchOutcome::Success {
                body: resp.body,
                status: resp.status,
                length,
                elapsed,
            }
        }
        Err(TransportError::Timeout) => {
            warn!(resp_time = elapsed.as_secs_f64(), "Timeout");
            FetchOutcome::Timeout { elapsed }
        }
        Err(TransportError::Connection(reason)) => {
            warn!(resp_time = elapsed.as_secs_f64(), reason = %reason, "Connection error");
            FetchOutcome::ConnectionError { elapsed }
        }
    };

    if let Some(path) = &config.fetch_log {
        let record = FetchRecord::new(started_at, query, &outcome, config);
        log_fetch(path.clone(), record).await;
    }

    outcome
}
