//! Schedule extraction from raw API responses.
//!
//! Bodies are untrusted: anything malformed is logged and skipped so one bad
//! response never costs the rest of the batch.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::fetch::BatchResult;
use crate::output::csv_line;

/// One schedule entry, flattened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedRow {
    pub date: String,
    pub call: String,
    pub remaining_minutes: String,
    pub destination: String,
}

impl ParsedRow {
    pub fn to_csv_line(&self) -> crate::error::Result<String> {
        csv_line(self)
    }
}

/// Parsed rows of a batch as CSV lines, with the batch's fetch time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBatch {
    pub rows: Vec<String>,
    pub elapsed: Duration,
}

#[derive(Error, Debug)]
pub enum MalformedPayload {
    #[error("empty answer")]
    NoJson,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("answer without times: {0}")]
    MissingSchedules(serde_json::Error),
}

#[derive(Deserialize)]
struct Payload {
    #[serde(rename = "_metadata")]
    metadata: Metadata,
    result: ScheduleResult,
}

#[derive(Deserialize)]
struct Metadata {
    date: String,
    call: String,
}

#[derive(Deserialize)]
struct ScheduleResult {
    schedules: Vec<Value>,
}

/// Extracts the rows of one response body.
///
/// Anything before the first `{` is discarded. A schedule entry without a
/// string `message` and `destination` is skipped on its own.
pub fn parse_body(body: &str) -> Result<Vec<ParsedRow>, MalformedPayload> {
    let start = body.find('{').ok_or(MalformedPayload::NoJson)?;
    let json: Value = serde_json::from_str(&body[start..])?;
    let payload: Payload =
        serde_json::from_value(json).map_err(MalformedPayload::MissingSchedules)?;

    let mut rows = Vec::with_capacity(payload.result.schedules.len());
    for schedule in &payload.result.schedules {
        let message = schedule.get("message").and_then(Value::as_str);
        let destination = schedule.get("destination").and_then(Value::as_str);
        match (message, destination) {
            (Some(message), Some(destination)) => rows.push(ParsedRow {
                date: payload.metadata.date.clone(),
                call: payload.metadata.call.clone(),
                remaining_minutes: message.replace(" mn", ""),
                destination: destination.to_string(),
            }),
            _ => warn!(schedule = %schedule, "Skipping schedule without message or destination"),
        }
    }

    Ok(rows)
}

/// Parses every body in order. Never fails.
pub fn parse_bodies<S: AsRef<str>>(bodies: &[S]) -> Vec<ParsedRow> {
    let mut rows = Vec::new();
    for body in bodies {
        match parse_body(body.as_ref()) {
            Ok(parsed) => rows.extend(parsed),
            Err(e) => warn!(error = %e, "Skipping response"),
        }
    }
    rows
}

/// Turns a fetched batch into CSV lines, keeping its elapsed time.
pub fn parse_batch(batch: &BatchResult) -> ParsedBatch {
    let rows = parse_bodies(&batch.bodies)
        .iter()
        .filter_map(|row| match row.to_csv_line() {
            Ok(line) => Some(line),
            Err(e) => {
                warn!(error = %e, "Unknown error while formatting row");
                None
            }
        })
        .collect();

    ParsedBatch {
        rows,
        elapsed: batch.elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{"_metadata":{"date":"2020-01-01","call":"X"},"result":{"schedules":[{"message":"5 mn","destination":"D"}]}}"#;

    fn batch(bodies: &[&str]) -> BatchResult {
        BatchResult {
            bodies: bodies.iter().map(|b| b.to_string()).collect(),
            elapsed: Duration::from_millis(42),
        }
    }

    #[test]
    fn test_parse_single_schedule() {
        let parsed = parse_batch(&batch(&[SAMPLE]));
        assert_eq!(parsed.rows, vec!["2020-01-01,X,5,D"]);
        assert_eq!(parsed.elapsed, Duration::from_millis(42));
    }

    #[test]
    fn test_preamble_before_json_is_stripped() {
        let body = format!("<!-- cached -->\n{SAMPLE}");
        assert_eq!(parse_body(&body).unwrap().len(), 1);
    }

    #[test]
    fn test_garbage_is_skipped() {
        let parsed = parse_batch(&batch(&["", "not json", "{broken", "[]", SAMPLE]));
        assert_eq!(parsed.rows, vec!["2020-01-01,X,5,D"]);
    }

    #[test]
    fn test_missing_keys_are_reported() {
        assert!(matches!(parse_body(""), Err(MalformedPayload::NoJson)));
        assert!(matches!(parse_body("{oops"), Err(MalformedPayload::Json(_))));
        assert!(matches!(
            parse_body(r#"{"result":{"schedules":[]}}"#),
            Err(MalformedPayload::MissingSchedules(_))
        ));
        assert!(matches!(
            parse_body(r#"{"_metadata":{"date":"d","call":"c"},"result":{"code":404}}"#),
            Err(MalformedPayload::MissingSchedules(_))
        ));
        assert!(matches!(
            parse_body(r#"{"_metadata":{"date":"d","call":"c"},"result":{"schedules":"none"}}"#),
            Err(MalformedPayload::MissingSchedules(_))
        ));
    }

    #[test]
    fn test_empty_schedules_yield_no_rows() {
        let body = r#"{"_metadata":{"date":"d","call":"c"},"result":{"schedules":[]}}"#;
        assert!(parse_body(body).unwrap().is_empty());
    }

    #[test]
    fn test_bad_entry_only_drops_that_row() {
        let body = r#"{"_metadata":{"date":"d","call":"GET /buses"},"result":{"schedules":[
            {"message":"2 mn","destination":"North"},
            {"message":null,"destination":"Nowhere"},
            {"destination":"South"},
            {"message":"Train a quai","destination":"South"}
        ]}}"#;

        let rows = parse_body(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].remaining_minutes, "2");
        assert_eq!(rows[0].destination, "North");
        assert_eq!(rows[1].remaining_minutes, "Train a quai");
    }

    #[test]
    fn test_rows_follow_body_then_schedule_order() {
        let first = r#"{"_metadata":{"date":"d1","call":"a"},"result":{"schedules":[
            {"message":"1 mn","destination":"X"},{"message":"7 mn","destination":"Y"}]}}"#;
        let second = r#"{"_metadata":{"date":"d2","call":"b"},"result":{"schedules":[
            {"message":"3 mn","destination":"Z"}]}}"#;

        let parsed = parse_batch(&batch(&[first, second]));
        assert_eq!(parsed.rows, vec!["d1,a,1,X", "d1,a,7,Y", "d2,b,3,Z"]);
    }

    #[test]
    fn test_fields_with_commas_are_quoted() {
        let body = r#"{"_metadata":{"date":"d","call":"c"},"result":{"schedules":[
            {"message":"5 mn","destination":"Gare de Lyon, Hall 1"}]}}"#;
        let parsed = parse_batch(&batch(&[body]));
        assert_eq!(parsed.rows, vec!["d,c,5,\"Gare de Lyon, Hall 1\""]);
    }
}
