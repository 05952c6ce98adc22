//! The single network seam of the crate. Everything above it (fetcher,
//! continuity strategies, orchestrator) talks to a `Transport`, which keeps
//! the retry and classification logic testable without sockets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::redirect::Policy;
use reqwest::Client;

use crate::error::TransportError;

/// One GET request, fully described.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub timeout: Duration,
}

/// A response of any status. Status filtering is the caller's job.
#[derive(Debug, Clone, Default)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
    /// Raw `Set-Cookie` header values, in arrival order.
    pub set_cookies: Vec<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: PageRequest) -> Result<PageResponse, TransportError>;
}

/// reqwest-backed transport. Cookies are sent and collected by hand so each
/// session owns its own context; the client itself keeps no cookie store.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .redirect(Policy::limited(5))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| TransportError::Connection {
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, request: PageRequest) -> Result<PageResponse, TransportError> {
        let url = request.url.as_str();
        let resp = self
            .client
            .get(url)
            .headers(request.headers)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;

        let status = resp.status().as_u16();
        let set_cookies = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = resp.text().await.map_err(|e| TransportError::from_reqwest(url, e))?;

        Ok(PageResponse { status, body, set_cookies })
    }
}
