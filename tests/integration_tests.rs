use std::sync::Arc;
use std::time::Duration;

use ratp_poll::config::FetchConfig;
use ratp_poll::error::TransportError;
use ratp_poll::fetch::{build_url, mock::MockClient, run_batch_with};
use ratp_poll::output::{GSTBP_CSV_COLUMNS, OutputMode, write_batch};
use ratp_poll::parser::parse_batch;
use ratp_poll::query::{Query, TransportType, Way};

#[tokio::test]
async fn test_full_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("schedules.csv");
    let config = FetchConfig {
        api_base: "https://api.test/v4/schedules".into(),
        timeout: Duration::from_millis(500),
        max_connections: 2,
        fetch_log: Some(dir.path().join("fetch.csv")),
    };

    let queries = vec![
        Query::new(TransportType::Metros, "1", "Bastille", Way::A),
        Query::new(TransportType::Rers, "B", "Denfert Rochereau", Way::AR),
        Query::new(TransportType::Buses, "187", "Division Leclerc", Way::R),
    ];
    let client = MockClient::new()
        .respond(
            &build_url(&config.api_base, &queries[0]),
            200,
            r#"{"_metadata":{"date":"2020-01-01T10:00:00+01:00","call":"GET /metros/1/bastille/A"},
                "result":{"schedules":[{"message":"2 mn","destination":"La Defense"},
                                       {"message":"6 mn","destination":"La Defense"}]}}"#,
        )
        .respond(
            &build_url(&config.api_base, &queries[1]),
            200,
            r#"{"result":{"code":400,"message":"Invalid station"}}"#,
        )
        .fail(
            &build_url(&config.api_base, &queries[2]),
            TransportError::Connection("refused".into()),
        );

    let batch = run_batch_with(Arc::new(client), &queries, &config).await;
    assert_eq!(batch.bodies.len(), 2);

    let parsed = parse_batch(&batch);
    write_batch(&output, OutputMode::Parsed, &parsed.rows).unwrap();
    write_batch(&output, OutputMode::Parsed, &parsed.rows).unwrap();

    let content = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines[0], GSTBP_CSV_COLUMNS);
    assert_eq!(lines.len(), 5);
    assert_eq!(
        lines[1],
        "2020-01-01T10:00:00+01:00,GET /metros/1/bastille/A,2,La Defense"
    );

    let fetch_log = std::fs::read_to_string(dir.path().join("fetch.csv")).unwrap();
    assert_eq!(fetch_log.lines().count(), 4);
}
