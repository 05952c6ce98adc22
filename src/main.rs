use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::sync::mpsc;

use postcode_scraper_lib::{
    logger, output_writer, HttpTransport, Orchestrator, ScraperConfig, SessionHandle,
    SessionStatus,
};

/// Scrape postcode detail pages listed in a JSON or CSV file.
#[derive(Parser, Debug)]
#[command(name = "postcode-scraper", version)]
struct Cli {
    /// Input file: a JSON list of `{office, url}` records (or `{ "url": [...] }`),
    /// or a CSV with the same columns.
    input: PathBuf,

    /// Cookie header to start the session with, e.g. a fresh `cf_clearance`.
    #[arg(long, env = "SCRAPER_COOKIES")]
    cookies: Option<String>,

    /// Where to write results. Defaults to `<input stem>_details.json` next to
    /// the input.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    let cli = Cli::parse();
    let config = ScraperConfig::from_env().context("loading configuration")?;
    info!("Starting Postcode Scraper on {:?}", cli.input);

    let transport = Arc::new(HttpTransport::new().context("building HTTP client")?);
    let orchestrator = Orchestrator::new(transport, config);

    let session = SessionHandle::new("cli");
    if let Some(cookies) = cli.cookies.as_deref() {
        session.cookies().replace_with(cookies);
    }

    let output = cli.output.unwrap_or_else(|| output_writer::details_path_for(&cli.input));
    let prompt = tokio::spawn(prompt_on_captcha(session.clone(), stdin_lines()));

    orchestrator.run_from_file(&session, &cli.input, None, &output).await;
    prompt.abort();

    let snap = session.snapshot();
    for e in &snap.errors {
        warn!("{}", e);
    }
    match snap.status {
        SessionStatus::Completed => {
            info!("{}", snap.message);
            Ok(())
        }
        _ => {
            error!("{}", snap.message);
            bail!("scraping did not complete: {}", snap.message)
        }
    }
}

/// Lines from stdin, read on a plain thread. A blocked read there never
/// holds up runtime shutdown once the job has finished.
fn stdin_lines() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.send(line).is_err() {
                return;
            }
        }
    });
    rx
}

/// Wait for CAPTCHA pauses and resolve them from stdin. A non-empty line is
/// taken as the cookie string copied from the browser.
async fn prompt_on_captcha(
    session: SessionHandle,
    mut lines: mpsc::UnboundedReceiver<std::io::Result<String>>,
) {
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        if session.status().is_terminal() {
            return;
        }
        if !session.is_captcha_required() {
            continue;
        }

        let snap = session.snapshot();
        println!();
        println!("{}", snap.message);
        if let Some(url) = &snap.captcha_url {
            println!("Open {} in your browser and solve the challenge.", url);
        }
        println!("Then paste your Cookie header (or just press Enter) to continue:");

        match lines.recv().await {
            Some(Ok(line)) => {
                let line = line.trim();
                session.resolve_captcha((!line.is_empty()).then(|| line.to_string()));
            }
            Some(Err(e)) => {
                warn!("Failed to read from stdin: {}", e);
                return;
            }
            None => {
                warn!("stdin closed; waiting for the CAPTCHA timeout");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paused_session() -> SessionHandle {
        let session = SessionHandle::new("cli");
        session.begin_pre_check(1);
        session.require_captcha("https://postcode.my/a.html", "solve it");
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_pasted_line_resolves_pause() {
        let session = paused_session();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Ok("  cf_clearance=abc  ".to_string())).unwrap();
        let prompt = tokio::spawn(prompt_on_captcha(session.clone(), rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(session.status(), SessionStatus::Running);
        assert_eq!(session.snapshot().user_cookies.as_deref(), Some("cf_clearance=abc"));

        session.complete("done", None);
        prompt.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_stops_when_job_ends_while_waiting_for_input() {
        let session = paused_session();
        let (_tx, rx) = mpsc::unbounded_channel();
        let prompt = tokio::spawn(prompt_on_captcha(session.clone(), rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        session.fail("CAPTCHA resolution timeout. Please try again.");
        prompt.abort();

        assert!(prompt.await.unwrap_err().is_cancelled());
    }
}
