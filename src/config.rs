use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ScrapeError;

/// Runtime knobs for the fetch-and-extract pipeline.
///
/// The size thresholds are tuned against the live directory's markup and
/// kept here rather than hard-coded at the call sites.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub request_timeout: Duration,
    pub record_delay_min: Duration,
    pub record_delay_max: Duration,
    pub captcha_poll_interval: Duration,
    pub captcha_settle_delay: Duration,
    pub captcha_timeout: Duration,
    /// Bodies shorter than this are degenerate for the classifier.
    pub degenerate_body_len: usize,
    /// Bodies shorter than this are suspected blocks for the extractor.
    pub full_page_len: usize,
    pub page_suffix: String,
    pub data_dir: PathBuf,
    pub session_retention: Duration,
    pub port: u16,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        ScraperConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(2000),
            request_timeout: Duration::from_millis(45_000),
            record_delay_min: Duration::from_millis(2000),
            record_delay_max: Duration::from_millis(5000),
            captcha_poll_interval: Duration::from_millis(1000),
            captcha_settle_delay: Duration::from_millis(1000),
            captcha_timeout: Duration::from_millis(600_000),
            degenerate_body_len: 500,
            full_page_len: 3000,
            page_suffix: ".html".to_string(),
            data_dir: PathBuf::from("data"),
            session_retention: Duration::from_secs(3600),
            port: 3000,
        }
    }
}

impl ScraperConfig {
    /// Defaults overridden by `SCRAPER_*` environment variables (and `.env`).
    pub fn from_env() -> Result<Self, ScrapeError> {
        let _ = dotenvy::dotenv();
        let defaults = ScraperConfig::default();

        Ok(ScraperConfig {
            max_retries: parse_var("SCRAPER_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            base_delay: millis_var("SCRAPER_BASE_DELAY_MS")?.unwrap_or(defaults.base_delay),
            request_timeout: millis_var("SCRAPER_REQUEST_TIMEOUT_MS")?
                .unwrap_or(defaults.request_timeout),
            record_delay_min: millis_var("SCRAPER_RECORD_DELAY_MIN_MS")?
                .unwrap_or(defaults.record_delay_min),
            record_delay_max: millis_var("SCRAPER_RECORD_DELAY_MAX_MS")?
                .unwrap_or(defaults.record_delay_max),
            captcha_poll_interval: millis_var("SCRAPER_CAPTCHA_POLL_MS")?
                .unwrap_or(defaults.captcha_poll_interval),
            captcha_timeout: millis_var("SCRAPER_CAPTCHA_TIMEOUT_MS")?
                .unwrap_or(defaults.captcha_timeout),
            page_suffix: env::var("SCRAPER_PAGE_SUFFIX").unwrap_or(defaults.page_suffix),
            data_dir: env::var("SCRAPER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            session_retention: parse_var::<u64>("SCRAPER_SESSION_RETENTION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_retention),
            port: parse_var("PORT")?.unwrap_or(defaults.port),
            ..defaults
        })
    }
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>, ScrapeError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ScrapeError::Config(format!("{} must be a number, got '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

fn millis_var(key: &str) -> Result<Option<Duration>, ScrapeError> {
    Ok(parse_var::<u64>(key)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tuned_thresholds() {
        let config = ScraperConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(45));
        assert_eq!(config.captcha_timeout, Duration::from_secs(600));
        assert_eq!(config.degenerate_body_len, 500);
        assert_eq!(config.full_page_len, 3000);
        assert_eq!(config.page_suffix, ".html");
    }

    #[test]
    fn test_malformed_override_is_rejected() {
        env::set_var("SCRAPER_TEST_BAD_NUMBER", "soon");
        let parsed = parse_var::<u64>("SCRAPER_TEST_BAD_NUMBER");
        env::remove_var("SCRAPER_TEST_BAD_NUMBER");
        assert!(matches!(parsed, Err(ScrapeError::Config(_))));
    }

    #[test]
    fn test_missing_override_is_none() {
        let parsed = millis_var("SCRAPER_TEST_NEVER_SET").unwrap();
        assert!(parsed.is_none());
    }
}
