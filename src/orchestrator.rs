use std::path::Path;
use std::sync::Arc;

use log::{error, info, warn};

use crate::classifier::classify_with;
use crate::config::ScraperConfig;
use crate::continuity::recover_page;
use crate::delay_manager;
use crate::error::ScrapeError;
use crate::extractor::{self, ContentCheck, ExtractedDetail, OfficeDetail};
use crate::fetcher::{Fetcher, HeaderProfile, RetryPolicy};
use crate::input_loader::{self, Record};
use crate::output_writer;
use crate::session::SessionHandle;
use crate::transport::{PageResponse, Transport};

/// Drives one job: records strictly in input order, one request at a time.
pub struct Orchestrator<T: Transport + ?Sized> {
    transport: Arc<T>,
    config: ScraperConfig,
}

impl<T: Transport + ?Sized> Orchestrator<T> {
    pub fn new(transport: Arc<T>, config: ScraperConfig) -> Self {
        Orchestrator { transport, config }
    }

    fn fetcher(&self) -> Fetcher<'_, T> {
        Fetcher::new(
            self.transport.as_ref(),
            RetryPolicy {
                max_retries: self.config.max_retries,
                base_delay: self.config.base_delay,
                timeout: self.config.request_timeout,
            },
        )
    }

    /// Load the input (unless `selected` overrides it), then [`run`](Self::run).
    pub async fn run_from_file(
        &self,
        session: &SessionHandle,
        input: &Path,
        selected: Option<Vec<Record>>,
        output: &Path,
    ) {
        let records = match selected {
            Some(records) => records,
            None => match input_loader::load_records(input) {
                Ok(records) => records,
                Err(e) => {
                    error!("Session {}: {}", session.id(), e);
                    session.fail(format!("Scraping failed: {}", e));
                    return;
                }
            },
        };
        self.run(session, records, output).await;
    }

    /// Process `records` and persist results to `output`. Ends the session in
    /// Completed, or in Error on input, timeout or persistence failure.
    pub async fn run(&self, session: &SessionHandle, records: Vec<Record>, output: &Path) {
        if let Err(e) = self.try_run(session, records, output).await {
            error!("Session {} failed: {}", session.id(), e);
            session.fail(format!("Scraping failed: {}", e));
        }
    }

    async fn try_run(
        &self,
        session: &SessionHandle,
        records: Vec<Record>,
        output: &Path,
    ) -> Result<(), ScrapeError> {
        let records = input_loader::processable(records, &self.config.page_suffix);
        let total = records.len();
        session.begin_pre_check(total);

        let Some(first) = records.first() else {
            output_writer::write_results(output, &[])?;
            session.complete("No page URLs to process.", Some(output.display().to_string()));
            return Ok(());
        };

        self.pre_check(session, first.url.trim()).await?;
        session.start_running(format!(
            "Pre-check passed. Starting to scrape {} postcode pages...",
            total
        ));

        let mut results = Vec::with_capacity(total);
        for (i, record) in records.iter().enumerate() {
            info!("Scraping {}/{}: {}", i + 1, total, record.office);
            session.set_progress(
                i + 1,
                format!("Scraping {}/{}: {}", i + 1, total, record.office),
            );

            match self.process_record(session, record, None, true).await {
                Ok(row) => {
                    let message = format!("Successfully scraped: {}", record.office);
                    session.push_result(row.clone(), message);
                    results.push(row);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Error scraping {}: {}", record.url, e);
                    session.push_error(format!("Error scraping {}: {}", record.url, e));

                    if session.is_captcha_required() {
                        let recovered =
                            self.pause_and_recover(session, record.url.trim()).await?;
                        match self.process_record(session, record, recovered, false).await {
                            Ok(row) => {
                                let message = format!(
                                    "Successfully scraped after CAPTCHA resolution: {}",
                                    record.office
                                );
                                session.push_result(row.clone(), message);
                                results.push(row);
                            }
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(e) => session.push_error(format!(
                                "Error scraping {} after CAPTCHA resolution: {}",
                                record.url, e
                            )),
                        }
                    }
                }
            }

            if i + 1 < total {
                session.set_message(format!(
                    "Processed {}/{}. Waiting before next request...",
                    i + 1,
                    total
                ));
                delay_manager::sleep_between_records(
                    self.config.record_delay_min,
                    self.config.record_delay_max,
                )
                .await;
            }
        }

        output_writer::write_results(output, &results)?;
        session.complete(
            format!(
                "Scraping completed! Extracted {} records to {}",
                results.len(),
                output.display()
            ),
            Some(output.display().to_string()),
        );
        Ok(())
    }

    /// Probe the first page before the loop. Transport failures are only
    /// reported; a block pauses the job until a human resolves it.
    async fn pre_check(&self, session: &SessionHandle, url: &str) -> Result<(), ScrapeError> {
        info!("Pre-checking for CAPTCHA at: {}", url);
        let cookie = session.cookies().header_value();

        let fetcher = self.fetcher();
        match fetcher.fetch_once(url, HeaderProfile::Rotating, cookie.as_deref()).await {
            Ok(resp) => {
                session.cookies().adopt_set_cookies(&resp.set_cookies);
                let verdict =
                    classify_with(resp.status, &resp.body, self.config.degenerate_body_len);
                if verdict.is_blocked {
                    warn!(
                        "CAPTCHA detected during pre-check for {}: {:?}",
                        url, verdict.matched_signals
                    );
                    session.require_captcha(
                        url,
                        "CAPTCHA detected before starting. Please solve it manually \
                         and click \"Continue\" to proceed.",
                    );
                    self.pause_and_recover(session, url).await?;
                } else {
                    info!("No CAPTCHA detected during pre-check. Safe to proceed.");
                }
            }
            Err(e) => {
                warn!("Pre-check failed for {}: {}", url, e);
                session.set_message(format!(
                    "Pre-check failed, but proceeding with scraping: {}",
                    e
                ));
            }
        }
        Ok(())
    }

    /// Wait for the human, then run the continuity strategies once.
    async fn pause_and_recover(
        &self,
        session: &SessionHandle,
        url: &str,
    ) -> Result<Option<PageResponse>, ScrapeError> {
        session
            .wait_for_resolution(
                self.config.captcha_poll_interval,
                self.config.captcha_settle_delay,
                self.config.captcha_timeout,
            )
            .await?;

        let recovered =
            recover_page(&self.fetcher(), session, url, self.config.full_page_len).await;
        Ok(recovered.map(|(_, resp)| resp))
    }

    /// Fetch → classify → extract for one record.
    ///
    /// `prefetched` skips the fetch (a page already obtained by recovery).
    /// With `may_pause` unset, blocks and short pages fail or go sentinel
    /// instead of pausing the job again.
    async fn process_record(
        &self,
        session: &SessionHandle,
        record: &Record,
        prefetched: Option<PageResponse>,
        may_pause: bool,
    ) -> Result<OfficeDetail, ScrapeError> {
        let url = record.url.trim();
        let sentinel = || OfficeDetail {
            office: record.office.clone(),
            detail: ExtractedDetail::sentinel(url),
        };

        let page = match prefetched {
            Some(page) => page,
            None => {
                let page = self
                    .fetcher()
                    .fetch(url, session.cookies(), |attempt, max| {
                        session.set_message(format!(
                            "Attempting to fetch {} (attempt {}/{})",
                            url, attempt, max
                        ))
                    })
                    .await?;

                let verdict =
                    classify_with(page.status, &page.body, self.config.degenerate_body_len);
                if verdict.is_blocked {
                    warn!(
                        "CAPTCHA/blocking detected for {} (status {}, {} bytes): {:?}",
                        url,
                        page.status,
                        page.body.len(),
                        verdict.matched_signals
                    );
                    if may_pause {
                        session.require_captcha(
                            url,
                            format!(
                                "CAPTCHA or blocking detected for {}. Please solve it manually \
                                 and click \"Continue\" to resume.",
                                url
                            ),
                        );
                    }
                    return Err(ScrapeError::Blocked {
                        url: url.to_string(),
                        signals: verdict.matched_signals,
                    });
                }
                page
            }
        };

        let body = match extractor::check_content(&page.body, self.config.full_page_len) {
            ContentCheck::Full => page.body,
            ContentCheck::GenuineErrorPage => {
                info!("Genuine error page at {}, returning empty data", url);
                return Ok(sentinel());
            }
            ContentCheck::SuspectedBlock if may_pause => {
                warn!(
                    "Short content ({} bytes) at {}, likely CAPTCHA or blocking",
                    page.body.len(),
                    url
                );
                session.require_captcha(
                    url,
                    format!(
                        "Short content detected ({} bytes) - likely CAPTCHA or blocking. \
                         Please solve it manually and click \"Continue\" to resume.",
                        page.body.len()
                    ),
                );
                match self.pause_and_recover(session, url).await? {
                    Some(resp) => resp.body,
                    None => {
                        warn!(
                            "Still no full page for {} after resolution, returning empty data",
                            url
                        );
                        return Ok(sentinel());
                    }
                }
            }
            ContentCheck::SuspectedBlock => {
                warn!(
                    "Short content ({} bytes) at {} on retry, returning empty data",
                    page.body.len(),
                    url
                );
                return Ok(sentinel());
            }
        };

        Ok(OfficeDetail {
            office: record.office.clone(),
            detail: extractor::extract(url, &body),
        })
    }
}
