//! Pure page classification: is this response the real page, or something
//! the server put in its place to stop us?

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::Serialize;

/// Challenge, rate-limit and access-denied vocabulary, in reporting order.
const BLOCKING_PATTERNS: &[&str] = &[
    r"captcha",
    r"hcaptcha",
    r"recaptcha",
    r"cloudflare.*challenge",
    r"security check",
    r"verify you are human",
    r"access denied",
    r"rate limit exceeded",
    r"too many requests",
    r"temporarily blocked",
    r"please complete.*verification",
];

/// Strings only a genuine directory page carries.
const NORMAL_CONTENT_MARKERS: &[&str] = &[
    "postcode.my",
    "postal code",
    "Location Information",
    "GPS Coordinate",
    "Post Office",
];

const ERROR_MARKERS: &[&str] = &["Service Unavailable", "Error 404"];

/// Bodies shorter than this are considered degenerate.
pub const DEGENERATE_BODY_LEN: usize = 500;

static BLOCKING_SIGNALS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    BLOCKING_PATTERNS
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .expect("blocking pattern is a valid regex")
        })
        .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub is_blocked: bool,
    /// Blocking regexes that matched, plus `status NNN` / `degenerate body`
    /// when those conditions contributed.
    pub matched_signals: Vec<String>,
    pub has_normal_content: bool,
}

/// Classify with the default degenerate-length threshold.
pub fn classify(status: u16, body: &str) -> ClassificationResult {
    classify_with(status, body, DEGENERATE_BODY_LEN)
}

/// `blocked = (signal || 403/429 || degenerate) && !normal content`.
///
/// Normal content overrides everything: real pages can mention "captcha" or
/// "access denied" in footers and help text.
pub fn classify_with(status: u16, body: &str, degenerate_len: usize) -> ClassificationResult {
    let mut matched_signals: Vec<String> = BLOCKING_SIGNALS
        .iter()
        .filter(|re| re.is_match(body))
        .map(|re| re.as_str().to_string())
        .collect();
    let has_signal = !matched_signals.is_empty();

    let is_status_blocking = status == 403 || status == 429;
    if is_status_blocking {
        matched_signals.push(format!("status {}", status));
    }

    let is_degenerate =
        body.len() < degenerate_len || ERROR_MARKERS.iter().any(|m| body.contains(m));
    if is_degenerate {
        matched_signals.push("degenerate body".to_string());
    }

    let has_normal_content = NORMAL_CONTENT_MARKERS.iter().any(|m| body.contains(m));

    ClassificationResult {
        is_blocked: (has_signal || is_status_blocking || is_degenerate) && !has_normal_content,
        matched_signals,
        has_normal_content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filler(len: usize) -> String {
        "lorem ipsum dolor sit amet ".repeat(len / 27 + 1)[..len].to_string()
    }

    #[test]
    fn test_normal_content_overrides_signal() {
        let body = format!(
            "<html><h3>Location Information</h3>{}<footer>protected by captcha</footer></html>",
            filler(4000)
        );
        let result = classify(200, &body);
        assert!(!result.is_blocked);
        assert!(result.has_normal_content);
        assert!(result.matched_signals.contains(&"captcha".to_string()));
    }

    #[test]
    fn test_rate_limit_status_on_short_body_blocks() {
        let body = filler(200);
        let result = classify(429, &body);
        assert!(result.is_blocked);
        assert!(result.matched_signals.contains(&"status 429".to_string()));
        assert!(result.matched_signals.contains(&"degenerate body".to_string()));
    }

    #[test]
    fn test_challenge_page_blocks_case_insensitively() {
        let body = format!("<title>Just a moment</title>{}VERIFY YOU ARE HUMAN", filler(2000));
        let result = classify(200, &body);
        assert!(result.is_blocked);
        assert_eq!(result.matched_signals, vec!["verify you are human".to_string()]);
    }

    #[test]
    fn test_plain_long_page_is_normal() {
        let result = classify(200, &filler(5000));
        assert!(!result.is_blocked);
        assert!(result.matched_signals.is_empty());
    }

    #[test]
    fn test_error_marker_counts_as_degenerate() {
        let body = format!("{}Service Unavailable", filler(2000));
        assert!(classify(200, &body).is_blocked);
    }

    #[test]
    fn test_forbidden_page_with_normal_content_is_not_blocked() {
        let body = format!("{} visit postcode.my", filler(100));
        assert!(!classify(403, &body).is_blocked);
    }

    #[test]
    fn test_custom_degenerate_threshold() {
        let body = filler(800);
        assert!(!classify_with(200, &body, 500).is_blocked);
        assert!(classify_with(200, &body, 1000).is_blocked);
    }
}
