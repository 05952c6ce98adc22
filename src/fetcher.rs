use std::time::Duration;

use log::{info, warn};
use rand::seq::SliceRandom;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION, COOKIE,
    PRAGMA, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};

use crate::cookies::CookieContext;
use crate::delay_manager;
use crate::error::{ScrapeError, TransportError};
use crate::transport::{PageRequest, PageResponse, Transport};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/120.0.0.0",
];

/// Fixed identity used by the fresh-session recovery strategy.
const CONSERVATIVE_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,\
                              image/webp,image/apng,*/*;q=0.8,\
                              application/signed-exchange;v=b3;q=0.7";

const CONSERVATIVE_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Which header set a request goes out with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProfile {
    /// Random user agent plus a full browser-like header set.
    Rotating,
    /// Fixed user agent, short header set.
    Conservative,
    /// User-Agent and Accept only.
    Minimal,
}

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(CONSERVATIVE_USER_AGENT)
}

/// Build the headers for one request. `cookie` is sent verbatim when non-empty.
pub fn build_headers(
    profile: HeaderProfile,
    cookie: Option<&str>,
) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    match profile {
        HeaderProfile::Rotating => {
            headers.insert(USER_AGENT, HeaderValue::from_static(random_user_agent()));
            headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
            headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
            headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
            headers.insert(
                HeaderName::from_static("sec-fetch-dest"),
                HeaderValue::from_static("document"),
            );
            headers.insert(
                HeaderName::from_static("sec-fetch-mode"),
                HeaderValue::from_static("navigate"),
            );
            headers.insert(
                HeaderName::from_static("sec-fetch-site"),
                HeaderValue::from_static("none"),
            );
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
            headers.insert(HeaderName::from_static("dnt"), HeaderValue::from_static("1"));
            headers.insert(HeaderName::from_static("sec-gpc"), HeaderValue::from_static("1"));
        }
        HeaderProfile::Conservative => {
            headers.insert(USER_AGENT, HeaderValue::from_static(CONSERVATIVE_USER_AGENT));
            headers.insert(ACCEPT, HeaderValue::from_static(CONSERVATIVE_ACCEPT));
            headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
            headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        }
        HeaderProfile::Minimal => {
            headers.insert(USER_AGENT, HeaderValue::from_static(random_user_agent()));
            headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
        }
    }

    if let Some(cookie) = cookie.filter(|c| !c.trim().is_empty()) {
        let value = HeaderValue::from_str(cookie)
            .map_err(|e| TransportError::InvalidHeader(format!("cookie: {}", e)))?;
        headers.insert(COOKIE, value);
    }
    Ok(headers)
}

/// Retry policy for [`Fetcher::fetch`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(2000),
            timeout: Duration::from_millis(45_000),
        }
    }
}

pub struct Fetcher<'a, T: Transport + ?Sized> {
    transport: &'a T,
    policy: RetryPolicy,
}

impl<'a, T: Transport + ?Sized> Fetcher<'a, T> {
    pub fn new(transport: &'a T, policy: RetryPolicy) -> Self {
        Fetcher { transport, policy }
    }

    /// GET `url` with rotating identity headers and the session's cookies.
    ///
    /// Any status below 500 is a result. 5xx and transport errors are retried
    /// with exponential backoff up to `max_retries` attempts in total, after
    /// which the last error comes back as `FetchExhausted`. `on_attempt` is
    /// called before every attempt with `(attempt, max_retries)`.
    pub async fn fetch<F>(
        &self,
        url: &str,
        cookies: &CookieContext,
        mut on_attempt: F,
    ) -> Result<PageResponse, ScrapeError>
    where
        F: FnMut(u32, u32),
    {
        let max = self.policy.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=max {
            on_attempt(attempt, max);
            let user_cookie = cookies.header_value();
            let headers = build_headers(HeaderProfile::Rotating, user_cookie.as_deref())?;
            info!(
                "Attempt {}/{} for {} (UA: {:.50}...)",
                attempt,
                max,
                url,
                headers.get(USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or_default()
            );

            let request =
                PageRequest { url: url.to_string(), headers, timeout: self.policy.timeout };
            let outcome = match self.transport.get(request).await {
                Ok(resp) if resp.status >= 500 => Err(TransportError::ServerStatus {
                    url: url.to_string(),
                    status: resp.status,
                }),
                other => other,
            };

            match outcome {
                Ok(resp) => {
                    if !resp.set_cookies.is_empty() {
                        let adopted = cookies.adopt_set_cookies(&resp.set_cookies);
                        info!("Stored {} session cookie(s) from {}", adopted, url);
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    warn!("Attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    if attempt < max {
                        delay_manager::sleep_backoff(self.policy.base_delay, attempt).await;
                    }
                }
            }
        }

        Err(ScrapeError::FetchExhausted {
            url: url.to_string(),
            attempts: max,
            cause: last_error.unwrap_or_else(|| TransportError::Connection {
                url: url.to_string(),
                reason: "no attempt was made".to_string(),
            }),
        })
    }

    /// Single GET with the given profile and explicit cookie string, no retry
    /// and no cookie adoption. Used by the pre-check and recovery strategies.
    pub async fn fetch_once(
        &self,
        url: &str,
        profile: HeaderProfile,
        cookie: Option<&str>,
    ) -> Result<PageResponse, TransportError> {
        let headers = build_headers(profile, cookie)?;
        self.transport
            .get(PageRequest { url: url.to_string(), headers, timeout: self.policy.timeout })
            .await
    }
}
