//! Network access for the cache manager.
//!
//! `Fetcher` is the seam the manager goes through for every network call;
//! `HttpFetcher` is the reqwest implementation used outside of tests.

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::Client;
use tracing::debug;

use crate::error::FetchError;
use crate::models::{Request, StoredResponse};

/// Default HTTP request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub trait Fetcher: Send + Sync {
    /// Perform the request. Any HTTP status resolves to `Ok`; only transport
    /// failures (DNS, connect, timeout, broken body) are errors.
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<StoredResponse, FetchError>>;
}

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("spendcache/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }

    fn classify_error(&self, request: &Request, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout.as_secs())
        } else if error.is_connect() {
            FetchError::Unreachable(request.url.to_string())
        } else {
            FetchError::Network(error)
        }
    }

    async fn send(&self, request: &Request) -> Result<StoredResponse, FetchError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await
            .map_err(|e| self.classify_error(request, e))?;

        let status = response.status();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.classify_error(request, e))?;

        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Fetched");

        Ok(StoredResponse {
            url,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: body.to_vec(),
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<StoredResponse, FetchError>> {
        self.send(request).boxed()
    }
}
