use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{Instrument, error, info};

use super::basic::BasicClient;
use super::client::HttpClient;
use super::fetch_gated;
use crate::config::FetchConfig;
use crate::error::{PollError, Result};
use crate::query::Query;

/// Non-empty successful bodies of a batch, in query order, and its
/// wall-clock time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub bodies: Vec<String>,
    pub elapsed: Duration,
}

/// Fetches every query concurrently through one pool built from `config`.
///
/// Only fails if the pool itself cannot be built; individual fetch failures
/// are dropped from the result.
pub async fn run_batch(queries: &[Query], config: &FetchConfig) -> Result<BatchResult> {
    config.validate()?;
    let client = Arc::new(BasicClient::from_config(config)?);
    Ok(run_batch_with(client, queries, config).await)
}

/// Like [`run_batch`], on a caller-supplied client.
///
/// At most `config.max_connections` requests are in flight; the rest wait for
/// a free slot, and that wait counts against each request's timeout.
pub async fn run_batch_with<C: HttpClient + 'static>(
    client: Arc<C>,
    queries: &[Query],
    config: &FetchConfig,
) -> BatchResult {
    let start = Instant::now();
    let semaphore = Arc::new(Semaphore::new(config.max_connections.max(1)));
    let config = Arc::new(config.clone());

    let mut tasks = Vec::with_capacity(queries.len());
    for query in queries {
        let sem = Arc::clone(&semaphore);
        let client = Arc::clone(&client);
        let config = Arc::clone(&config);
        let query = query.clone();

        let task = tokio::spawn(
            async move {
                fetch_gated(client.as_ref(), &query, &config, Some(sem.as_ref()))
                    .await
                    .into_body()
            }
            .in_current_span(),
        );
        tasks.push(task);
    }

    let mut bodies = Vec::with_capacity(tasks.len());
    let mut dropped = 0usize;
    for task in tasks {
        match task.await {
            Ok(Some(body)) if !body.is_empty() => bodies.push(body),
            Ok(_) => dropped += 1,
            Err(e) => {
                error!(error = %e, "Fetch task panicked");
                dropped += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    info!(
        requested = queries.len(),
        succeeded = bodies.len(),
        dropped,
        max_connections = config.max_connections,
        elapsed_secs = elapsed.as_secs_f64(),
        "Batch finished"
    );

    BatchResult { bodies, elapsed }
}

/// Fetches a single query, failing with [`PollError::EmptyBatchResult`] when
/// nothing came back.
pub async fn get_stop_times(query: &Query, config: &FetchConfig) -> Result<(String, Duration)> {
    config.validate()?;
    let client = Arc::new(BasicClient::from_config(config)?);
    get_stop_times_with(client, query, config).await
}

pub async fn get_stop_times_with<C: HttpClient + 'static>(
    client: Arc<C>,
    query: &Query,
    config: &FetchConfig,
) -> Result<(String, Duration)> {
    let batch = run_batch_with(client, std::slice::from_ref(query), config).await;
    match batch.bodies.into_iter().next() {
        Some(body) => Ok((body, batch.elapsed)),
        None => {
            error!("Empty answer");
            Err(PollError::EmptyBatchResult)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::fetch::build_url;
    use crate::fetch::mock::MockClient;
    use crate::query::{TransportType, Way};

    fn queries(n: usize) -> Vec<Query> {
        (0..n)
            .map(|i| Query::new(TransportType::Buses, i.to_string(), "Stop", Way::A))
            .collect()
    }

    fn config(max_connections: usize) -> FetchConfig {
        FetchConfig {
            api_base: "http://api.test".into(),
            timeout: Duration::from_millis(300),
            max_connections,
            fetch_log: None,
        }
    }

    #[tokio::test]
    async fn test_batch_keeps_input_order_and_drops_failures() {
        let config = config(10);
        let qs = queries(5);
        let url = |i: usize| build_url(&config.api_base, &qs[i]);

        let client = MockClient::new()
            .respond(&url(0), 200, "zero")
            .fail(&url(1), TransportError::Connection("reset".into()))
            .respond(&url(2), 200, "two")
            .respond(&url(3), 200, "three")
            .respond(&url(4), 200, "four")
            .with_url_latency(&url(3), Duration::from_secs(2))
            .with_url_latency(&url(0), Duration::from_millis(50));

        let result = run_batch_with(Arc::new(client), &qs, &config).await;

        // 1 is a connection error, 3 times out; 0 finishes after 2 and 4.
        assert_eq!(result.bodies, vec!["zero", "two", "four"]);
    }

    #[tokio::test]
    async fn test_batch_drops_empty_bodies() {
        let config = config(2);
        let qs = queries(3);
        let client = MockClient::new()
            .respond_all(200, "")
            .respond(&build_url(&config.api_base, &qs[1]), 200, "one");

        let result = run_batch_with(Arc::new(client), &qs, &config).await;

        assert_eq!(result.bodies, vec!["one"]);
    }

    #[tokio::test]
    async fn test_single_query_empty_body_is_empty_answer() {
        let client = MockClient::new().respond_all(200, "");

        let err = get_stop_times_with(Arc::new(client), &queries(1)[0], &config(1))
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::EmptyBatchResult));
    }

    #[tokio::test]
    async fn test_queue_wait_counts_against_timeout() {
        let config = FetchConfig {
            timeout: Duration::from_millis(400),
            ..config(1)
        };
        let client = MockClient::new()
            .respond_all(200, "{}")
            .with_latency(Duration::from_millis(250));

        let result = run_batch_with(Arc::new(client), &queries(3), &config).await;

        // The first request holds the only slot for 250ms; the second then
        // runs past the 400ms deadline and the third never gets a slot.
        assert_eq!(result.bodies.len(), 1);
        assert!(result.elapsed < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_batch_respects_connection_limit() {
        let client = Arc::new(
            MockClient::new()
                .respond_all(200, "{}")
                .with_latency(Duration::from_millis(30)),
        );

        let result = run_batch_with(Arc::clone(&client), &queries(12), &config(3)).await;

        assert_eq!(result.bodies.len(), 12);
        assert_eq!(client.call_count(), 12);
        assert!(client.max_in_flight() <= 3);
        assert!(client.max_in_flight() >= 1);
    }

    #[tokio::test]
    async fn test_batch_elapsed_is_wall_clock() {
        let client = MockClient::new()
            .respond_all(200, "{}")
            .with_latency(Duration::from_millis(100));

        let result = run_batch_with(Arc::new(client), &queries(4), &config(4)).await;

        // Four parallel 100ms calls take ~100ms, not 400ms.
        assert!(result.elapsed >= Duration::from_millis(100));
        assert!(result.elapsed < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_single_query_empty_answer() {
        let client = MockClient::new();

        let err = get_stop_times_with(Arc::new(client), &queries(1)[0], &config(1))
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::EmptyBatchResult));
    }

    #[tokio::test]
    async fn test_single_query_returns_body() {
        let client = MockClient::new().respond_all(200, "{\"result\":{}}");

        let (body, _) = get_stop_times_with(Arc::new(client), &queries(1)[0], &config(1))
            .await
            .unwrap();

        assert_eq!(body, "{\"result\":{}}");
    }

    #[tokio::test]
    async fn test_run_batch_rejects_zero_connections() {
        let err = run_batch(&queries(1), &config(0)).await.unwrap_err();
        assert!(matches!(err, PollError::Configuration(_)));
    }
}
