use super::client::{HttpClient, HttpResponse};
use crate::config::FetchConfig;
use crate::error::{PollError, TransportError};
use async_trait::async_trait;

/// [`HttpClient`] backed by a pooled `reqwest::Client`.
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    /// Builds a client whose pool and timeout follow `config`.
    pub fn from_config(config: &FetchConfig) -> Result<Self, PollError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .pool_max_idle_per_host(config.max_connections)
            .build()?;
        Ok(Self(client))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let resp = self.0.get(url).send().await.map_err(classify)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(classify)?;
        Ok(HttpResponse { status, body })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(err.to_string())
    }
}
