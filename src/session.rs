//! Per-job run state and its lifecycle:
//!
//! ```text
//! Starting -> PreChecking -> Running <-> CaptchaRequired -> Completed | Error
//! ```
//!
//! The orchestrator writes progress, results, errors, message and status;
//! the resolution interface writes `captcha_required` and `user_cookies`.
//! Completed and Error are terminal.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::Notify;

use crate::cookies::CookieContext;
use crate::error::ScrapeError;
use crate::extractor::OfficeDetail;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    PreChecking,
    Running,
    CaptchaRequired,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }
}

/// Snapshot of a job, as served to pollers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub progress: usize,
    pub total: usize,
    pub results: Vec<OfficeDetail>,
    pub errors: Vec<String>,
    pub captcha_required: bool,
    pub captcha_url: Option<String>,
    #[serde(skip)]
    pub user_cookies: Option<String>,
    pub message: String,
    pub output_file: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Session {
    fn new(id: String) -> Self {
        Session {
            id,
            status: SessionStatus::Starting,
            progress: 0,
            total: 0,
            results: Vec::new(),
            errors: Vec::new(),
            captcha_required: false,
            captcha_url: None,
            user_cookies: None,
            message: "Initializing scraping process...".to_string(),
            output_file: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

struct Shared {
    state: Mutex<Session>,
    cookies: CookieContext,
    resolved: Notify,
}

/// Cheap, cloneable handle to one session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Shared>,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        SessionHandle {
            inner: Arc::new(Shared {
                state: Mutex::new(Session::new(id.into())),
                cookies: CookieContext::new(),
                resolved: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, Session> {
        // Every mutation below leaves the record consistent, so recover from poisoning.
        self.inner.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> String {
        self.state().id.clone()
    }

    /// This session's cookie context. Never shared with other jobs.
    pub fn cookies(&self) -> &CookieContext {
        &self.inner.cookies
    }

    pub fn snapshot(&self) -> Session {
        self.state().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state().status
    }

    pub fn is_captcha_required(&self) -> bool {
        self.state().captcha_required
    }

    /// Hand the human-supplied cookies to recovery. Each paste is replayed once.
    pub fn take_user_cookies(&self) -> Option<String> {
        self.state().user_cookies.take()
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.state().message = message.into();
    }

    pub fn begin_pre_check(&self, total: usize) {
        let mut s = self.state();
        if s.status.is_terminal() {
            return;
        }
        s.total = total;
        s.progress = s.progress.min(total);
        s.status = SessionStatus::PreChecking;
        s.message = "Pre-checking for CAPTCHA before starting scraping...".to_string();
    }

    pub fn start_running(&self, message: impl Into<String>) {
        let mut s = self.state();
        if s.status.is_terminal() {
            return;
        }
        s.status = SessionStatus::Running;
        s.captcha_required = false;
        s.message = message.into();
    }

    /// `progress` is clamped to `total`.
    pub fn set_progress(&self, progress: usize, message: impl Into<String>) {
        let mut s = self.state();
        s.progress = progress.min(s.total);
        s.message = message.into();
    }

    pub fn push_result(&self, row: OfficeDetail, message: impl Into<String>) {
        let mut s = self.state();
        s.results.push(row);
        s.message = message.into();
    }

    /// While paused, `message` keeps the resolution instructions.
    pub fn push_error(&self, error: impl Into<String>) {
        let mut s = self.state();
        let error = error.into();
        if !s.captcha_required {
            s.message = error.clone();
        }
        s.errors.push(error);
    }

    /// Pause the job for a human. Returns false if the session is already terminal.
    pub fn require_captcha(&self, url: &str, message: impl Into<String>) -> bool {
        let mut s = self.state();
        if s.status.is_terminal() {
            return false;
        }
        s.status = SessionStatus::CaptchaRequired;
        s.captcha_required = true;
        s.captcha_url = Some(url.to_string());
        s.message = message.into();
        warn!("Session {} waiting for CAPTCHA resolution at {}", s.id, url);
        true
    }

    /// External signal that a human cleared the challenge.
    ///
    /// Clears the flag and returns the session to Running in one step, then
    /// wakes the waiting orchestrator. Returns false, changing nothing, if the
    /// session has already finished.
    pub fn resolve_captcha(&self, user_cookies: Option<String>) -> bool {
        {
            let mut s = self.state();
            if s.status.is_terminal() {
                return false;
            }
            if let Some(cookies) = user_cookies.filter(|c| !c.trim().is_empty()) {
                s.user_cookies = Some(cookies);
            }
            s.captcha_required = false;
            if s.status == SessionStatus::CaptchaRequired {
                s.status = SessionStatus::Running;
            }
            s.message = "CAPTCHA solved! Resuming scraping process...".to_string();
            info!("CAPTCHA resolved for session {}", s.id);
        }
        self.inner.resolved.notify_waiters();
        true
    }

    pub fn complete(&self, message: impl Into<String>, output_file: Option<String>) {
        let mut s = self.state();
        if s.status.is_terminal() {
            return;
        }
        s.status = SessionStatus::Completed;
        s.captcha_required = false;
        s.output_file = output_file;
        s.message = message.into();
        s.finished_at = Some(Utc::now());
    }

    pub fn fail(&self, message: impl Into<String>) {
        let mut s = self.state();
        if s.status.is_terminal() {
            return;
        }
        s.status = SessionStatus::Error;
        s.captcha_required = false;
        s.message = message.into();
        s.finished_at = Some(Utc::now());
    }

    /// Suspend until `resolve_captcha` is called.
    ///
    /// Wakes on the resolution notification, with a `poll` fallback. Once
    /// resolved it sleeps `settle` before returning. After `timeout` the
    /// session is moved to Error and `CaptchaTimeout` is returned.
    pub async fn wait_for_resolution(
        &self,
        poll: Duration,
        settle: Duration,
        timeout: Duration,
    ) -> Result<(), ScrapeError> {
        info!("Starting CAPTCHA wait for session {}", self.id());

        let resolved = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.inner.resolved.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if !self.is_captcha_required() {
                    return;
                }
                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        })
        .await;

        match resolved {
            Ok(()) => {
                tokio::time::sleep(settle).await;
                Ok(())
            }
            Err(_) => {
                warn!("CAPTCHA resolution timeout for session {}", self.id());
                self.fail("CAPTCHA resolution timeout. Please try again.");
                Err(ScrapeError::CaptchaTimeout { waited: timeout })
            }
        }
    }
}
