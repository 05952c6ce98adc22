//! Getting a usable page right after a human cleared a challenge.
//!
//! Strategies are tried in order, first success wins. Success means a
//! response below 500 whose body looks like a full page.

use log::{info, warn};

use crate::fetcher::{Fetcher, HeaderProfile};
use crate::session::SessionHandle;
use crate::transport::{PageResponse, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Replay the exact cookie string the human supplied.
    UserCookies,
    /// Drop all cookies and come back as a new, conservative visitor.
    FreshSession,
    /// Bare User-Agent + Accept request.
    Minimal,
}

impl RecoveryStrategy {
    pub const ORDER: [RecoveryStrategy; 3] =
        [RecoveryStrategy::UserCookies, RecoveryStrategy::FreshSession, RecoveryStrategy::Minimal];

    pub fn name(self) -> &'static str {
        match self {
            RecoveryStrategy::UserCookies => "user cookies",
            RecoveryStrategy::FreshSession => "fresh session",
            RecoveryStrategy::Minimal => "minimal headers",
        }
    }
}

fn qualifies(resp: &PageResponse, full_page_len: usize) -> bool {
    resp.status < 500 && resp.body.len() >= full_page_len
}

/// Run the strategies for `url` against `session`'s cookie context.
/// Returns the winning strategy and its response, or `None` if all failed.
pub async fn recover_page<T: Transport + ?Sized>(
    fetcher: &Fetcher<'_, T>,
    session: &SessionHandle,
    url: &str,
    full_page_len: usize,
) -> Option<(RecoveryStrategy, PageResponse)> {
    let cookies = session.cookies();

    for strategy in RecoveryStrategy::ORDER {
        let attempt = match strategy {
            RecoveryStrategy::UserCookies => {
                let Some(user_cookies) = session.take_user_cookies() else {
                    continue;
                };
                let result = fetcher
                    .fetch_once(url, HeaderProfile::Rotating, Some(user_cookies.as_str()))
                    .await;
                if let Ok(resp) = &result {
                    if qualifies(resp, full_page_len) {
                        cookies.replace_with(&user_cookies);
                    }
                }
                result
            }
            RecoveryStrategy::FreshSession => {
                cookies.clear();
                fetcher.fetch_once(url, HeaderProfile::Conservative, None).await
            }
            RecoveryStrategy::Minimal => {
                fetcher.fetch_once(url, HeaderProfile::Minimal, None).await
            }
        };

        match attempt {
            Ok(resp) => {
                if strategy != RecoveryStrategy::UserCookies {
                    cookies.adopt_set_cookies(&resp.set_cookies);
                }
                if qualifies(&resp, full_page_len) {
                    info!(
                        "Recovered {} via {} ({} bytes, status {})",
                        url,
                        strategy.name(),
                        resp.body.len(),
                        resp.status
                    );
                    return Some((strategy, resp));
                }
                warn!(
                    "Strategy '{}' for {} returned {} bytes with status {}",
                    strategy.name(),
                    url,
                    resp.body.len(),
                    resp.status
                );
            }
            Err(e) => warn!("Strategy '{}' for {} failed: {}", strategy.name(), url, e),
        }
    }

    warn!("All recovery strategies failed for {}", url);
    None
}
