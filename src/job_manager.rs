use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use log::info;
use uuid::Uuid;

use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::input_loader::Record;
use crate::orchestrator::Orchestrator;
use crate::output_writer;
use crate::session::{Session, SessionHandle};
use crate::transport::Transport;

/// Registry of running and finished jobs, keyed by session id.
pub struct JobManager {
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
    orchestrator: Arc<Orchestrator<dyn Transport>>,
}

impl JobManager {
    pub fn new(transport: Arc<dyn Transport>, config: ScraperConfig) -> Self {
        JobManager {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            orchestrator: Arc::new(Orchestrator::new(transport, config)),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn a job over `input_path`. `selected` replaces the file's records
    /// when given. Results land next to the input as `<stem>_details.json`.
    pub fn start_job(&self, input_path: PathBuf, selected: Option<Vec<Record>>) -> String {
        let job_id = Uuid::new_v4().to_string();
        let session = SessionHandle::new(job_id.clone());
        self.sessions().insert(job_id.clone(), session.clone());

        let orchestrator = self.orchestrator.clone();
        let output_path = output_writer::details_path_for(&input_path);
        info!("Starting job {} for {:?}", job_id, input_path);

        tokio::spawn(async move {
            orchestrator
                .run_from_file(&session, &input_path, selected, &output_path)
                .await;
            info!("Job {} finished with status {:?}", session.id(), session.status());
        });

        job_id
    }

    pub fn session(&self, job_id: &str) -> Option<SessionHandle> {
        self.sessions().get(job_id).cloned()
    }

    pub fn get_progress(&self, job_id: &str) -> Option<Session> {
        self.session(job_id).map(|s| s.snapshot())
    }

    /// Signal that a human cleared the challenge for `job_id`.
    /// A session that already finished is left untouched.
    pub fn resolve_captcha(
        &self,
        job_id: &str,
        user_cookies: Option<String>,
    ) -> Result<(), ScrapeError> {
        let session = self
            .session(job_id)
            .ok_or_else(|| ScrapeError::SessionNotFound(job_id.to_string()))?;
        if !session.resolve_captcha(user_cookies) {
            info!("Session {} already finished, ignoring CAPTCHA resolution", job_id);
        }
        Ok(())
    }

    /// The results file, once the job has completed.
    pub fn output_file(&self, job_id: &str) -> Option<PathBuf> {
        self.get_progress(job_id)?.output_file.map(PathBuf::from)
    }

    /// Drop finished sessions older than `retention`. Returns how many went.
    pub fn reap_finished(&self, retention: Duration) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions();
        let before = sessions.len();

        sessions.retain(|_, session| {
            let snap = session.snapshot();
            match snap.finished_at {
                Some(finished) if snap.status.is_terminal() => {
                    (now - finished).to_std().map_or(true, |age| age < retention)
                }
                _ => true,
            }
        });

        let removed = before - sessions.len();
        if removed > 0 {
            info!("Cleaned up {} finished sessions", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use crate::transport::mock::{self, MockTransport};

    const PAGE: &str = "https://postcode.my/perlis-arau-kampung-titi-gajah-02600.html";

    fn manager(transport: MockTransport) -> JobManager {
        JobManager::new(Arc::new(transport), ScraperConfig::default())
    }

    async fn wait_until_finished(manager: &JobManager, job_id: &str) -> Session {
        loop {
            let snap = manager.get_progress(job_id).unwrap();
            if snap.status.is_terminal() {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_to_completion_and_writes_details() {
        let transport = MockTransport::new();
        let body = std::fs::read_to_string("tests/fixtures/kampung_titi_gajah.html").unwrap();
        transport.script(PAGE, vec![mock::ok(200, &body)]);
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("perlis_1.json");
        std::fs::write(&input, format!(r#"[{{"office":"Arau","url":"{}"}}]"#, PAGE)).unwrap();

        let manager = manager(transport);
        let job_id = manager.start_job(input, None);
        let snap = wait_until_finished(&manager, &job_id).await;

        assert_eq!(snap.status, SessionStatus::Completed);
        assert_eq!(snap.results.len(), 1);
        let output = manager.output_file(&job_id).unwrap();
        assert_eq!(output, dir.path().join("perlis_1_details.json"));
        assert!(output.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_selected_records_override_file() {
        let transport = MockTransport::new();
        let body = format!("<html><body>{}</body></html>", "x".repeat(3200));
        transport.script(PAGE, vec![mock::ok(200, &body)]);
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("never_written.json");

        let manager = manager(transport);
        let selected = vec![Record { office: "Arau".into(), url: PAGE.into() }];
        let job_id = manager.start_job(input, Some(selected));
        let snap = wait_until_finished(&manager, &job_id).await;

        assert_eq!(snap.status, SessionStatus::Completed);
        assert_eq!(snap.results[0].office, "Arau");
        assert!(snap.results[0].detail.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_input_ends_in_error() {
        let manager = manager(MockTransport::new());
        let job_id = manager.start_job(PathBuf::from("/no/such/file.json"), None);
        let snap = wait_until_finished(&manager, &job_id).await;

        assert_eq!(snap.status, SessionStatus::Error);
        assert!(manager.output_file(&job_id).is_none());
    }

    #[test]
    fn test_unknown_session_is_reported() {
        let manager = manager(MockTransport::new());
        assert!(manager.get_progress("nope").is_none());
        assert!(matches!(
            manager.resolve_captcha("nope", None),
            Err(ScrapeError::SessionNotFound(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_resolution_after_completion_changes_nothing() {
        let manager = manager(MockTransport::new());
        let done = SessionHandle::new("done");
        done.complete("Scraping completed!", None);
        manager.sessions().insert("done".into(), done);

        manager.resolve_captcha("done", Some("late=1".into())).unwrap();

        let snap = manager.get_progress("done").unwrap();
        assert_eq!(snap.status, SessionStatus::Completed);
        assert_eq!(snap.message, "Scraping completed!");
        assert_eq!(snap.user_cookies, None);
    }

    #[test]
    fn test_reaper_only_drops_finished_sessions() {
        let manager = manager(MockTransport::new());
        let done = SessionHandle::new("done");
        done.complete("ok", None);
        let running = SessionHandle::new("running");
        running.begin_pre_check(1);
        manager.sessions().insert("done".into(), done);
        manager.sessions().insert("running".into(), running);

        assert_eq!(manager.reap_finished(Duration::from_secs(3600)), 0);
        assert_eq!(manager.reap_finished(Duration::ZERO), 1);
        assert!(manager.get_progress("done").is_none());
        assert!(manager.get_progress("running").is_some());
    }
}
