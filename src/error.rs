//! Error types for the scraping pipeline.
//!
//! Per-record failures (`Transport`, `FetchExhausted`, `Blocked`) are
//! recovered by the orchestrator and logged into the session. Only
//! `InputRead` and `CaptchaTimeout` end a whole job.

use std::time::Duration;

use thiserror::Error;

/// A single failed HTTP attempt.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    #[error("server returned status {status} for {url}")]
    ServerStatus { url: String, status: u16 },

    #[error("could not read response body from {url}: {reason}")]
    Body { url: String, reason: String },

    #[error("invalid header value: {0}")]
    InvalidHeader(String),
}

impl TransportError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout { url: url.to_string() }
        } else if err.is_body() || err.is_decode() {
            TransportError::Body { url: url.to_string(), reason: err.to_string() }
        } else {
            TransportError::Connection { url: url.to_string(), reason: err.to_string() }
        }
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("gave up on {url} after {attempts} attempts: {cause}")]
    FetchExhausted {
        url: String,
        attempts: u32,
        #[source]
        cause: TransportError,
    },

    #[error("blocked page at {url} (signals: {})", signals.join(", "))]
    Blocked { url: String, signals: Vec<String> },

    #[error("CAPTCHA was not resolved within {}s", waited.as_secs())]
    CaptchaTimeout { waited: Duration },

    #[error("could not read input {path}: {reason}")]
    InputRead { path: String, reason: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ScrapeError {
    /// Whether this error ends the whole job rather than a single record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScrapeError::CaptchaTimeout { .. } | ScrapeError::InputRead { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let timeout = ScrapeError::CaptchaTimeout { waited: Duration::from_secs(600) };
        assert!(timeout.is_fatal());
        assert_eq!(timeout.to_string(), "CAPTCHA was not resolved within 600s");

        let blocked = ScrapeError::Blocked {
            url: "https://postcode.my/a.html".into(),
            signals: vec!["captcha".into(), "status 429".into()],
        };
        assert!(!blocked.is_fatal());
        assert!(blocked.to_string().contains("captcha, status 429"));
    }

    #[test]
    fn test_exhausted_keeps_cause() {
        let err = ScrapeError::FetchExhausted {
            url: "https://postcode.my/a.html".into(),
            attempts: 3,
            cause: TransportError::Timeout { url: "https://postcode.my/a.html".into() },
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("request to https://postcode.my/a.html timed out"));
    }
}
