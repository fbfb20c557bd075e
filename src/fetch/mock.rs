//! Scripted [`HttpClient`] for tests.
//!
//! Replies are keyed by full URL, with an optional fallback. Every call can be
//! delayed, and the client records how many calls were in flight at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::client::{HttpClient, HttpResponse};
use crate::error::TransportError;

type Reply = Result<HttpResponse, TransportError>;

#[derive(Default)]
struct MockState {
    replies: HashMap<String, Reply>,
    fallback: Option<Reply>,
    latency: Duration,
    slow_urls: HashMap<String, Duration>,
}

#[derive(Clone, Default)]
pub struct MockClient {
    state: Arc<Mutex<MockState>>,
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `url` with `status` and `body`.
    pub fn respond(self, url: &str, status: u16, body: &str) -> Self {
        self.reply(
            url,
            Ok(HttpResponse {
                status,
                body: body.to_string(),
            }),
        )
    }

    /// Fails `url` with a transport error.
    pub fn fail(self, url: &str, err: TransportError) -> Self {
        self.reply(url, Err(err))
    }

    /// Answers every URL without a scripted reply.
    pub fn respond_all(self, status: u16, body: &str) -> Self {
        self.lock_state().fallback = Some(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
        self
    }

    /// Delays every call.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock_state().latency = latency;
        self
    }

    /// Delays calls to `url` only, overriding the global latency.
    pub fn with_url_latency(self, url: &str, latency: Duration) -> Self {
        self.lock_state()
            .slow_urls
            .insert(url.to_string(), latency);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Highest number of concurrent calls observed so far.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn reply(self, url: &str, reply: Reply) -> Self {
        self.lock_state().replies.insert(url.to_string(), reply);
        self
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HttpClient for MockClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(url.to_string());
        }

        let _guard = InFlightGuard::enter(&self.in_flight, &self.max_in_flight);

        let (latency, reply) = {
            let state = self.lock_state();
            let latency = state.slow_urls.get(url).copied().unwrap_or(state.latency);
            let reply = state
                .replies
                .get(url)
                .or(state.fallback.as_ref())
                .cloned()
                .unwrap_or_else(|| Err(TransportError::Connection(format!("no reply for {url}"))));
            (latency, reply)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        reply
    }
}

struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>, max: &Arc<AtomicUsize>) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
