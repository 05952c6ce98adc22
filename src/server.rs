use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use log::{error, info};
use serde::Deserialize;

use postcode_scraper_lib::{logger, HttpTransport, JobManager, Record, ScrapeError, ScraperConfig};

struct AppState {
    job_manager: Arc<JobManager>,
    data_dir: PathBuf,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest {
    selected_records: Option<Vec<Record>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CaptchaSolvedRequest {
    user_cookies: Option<String>,
}

/// Only bare file names inside the data directory are accepted.
fn resolve_data_file(data_dir: &Path, filename: &str) -> Option<PathBuf> {
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Some(data_dir.join(name)),
        _ => None,
    }
}

#[get("/api/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[post("/api/scrape/{filename}")]
async fn start_scrape(
    path: web::Path<String>,
    body: Option<web::Json<ScrapeRequest>>,
    data: web::Data<AppState>,
) -> impl Responder {
    let filename = path.into_inner();
    let Some(input_path) = resolve_data_file(&data.data_dir, &filename) else {
        return HttpResponse::BadRequest().json(serde_json::json!({ "error": "Invalid filename" }));
    };

    let selected = body.and_then(|b| b.into_inner().selected_records);
    if selected.is_none() && !input_path.exists() {
        return HttpResponse::NotFound().json(serde_json::json!({ "error": "File not found" }));
    }

    let session_id = data.job_manager.start_job(input_path, selected);
    HttpResponse::Ok().json(serde_json::json!({
        "sessionId": session_id,
        "message": "Scraping started. Use the session ID to check progress."
    }))
}

#[get("/api/progress/{session_id}")]
async fn get_progress(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    match data.job_manager.get_progress(&path.into_inner()) {
        Some(session) => HttpResponse::Ok().json(session),
        None => HttpResponse::NotFound().json(serde_json::json!({ "error": "Session not found" })),
    }
}

#[post("/api/captcha-solved/{session_id}")]
async fn captcha_solved(
    path: web::Path<String>,
    body: Option<web::Json<CaptchaSolvedRequest>>,
    data: web::Data<AppState>,
) -> impl Responder {
    let user_cookies = body.and_then(|b| b.into_inner().user_cookies);
    match data.job_manager.resolve_captcha(&path.into_inner(), user_cookies) {
        Ok(()) => {
            HttpResponse::Ok().json(serde_json::json!({ "message": "CAPTCHA marked as solved" }))
        }
        Err(ScrapeError::SessionNotFound(_)) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Session not found" }))
        }
        Err(e) => {
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}

#[get("/api/download/{session_id}")]
async fn download_result(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    let Some(output_path) = data.job_manager.output_file(&path.into_inner()) else {
        return HttpResponse::NotFound().body("Result file not generated yet.");
    };

    match std::fs::read_to_string(&output_path) {
        Ok(content) => {
            let name = output_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "results.json".to_string());
            HttpResponse::Ok()
                .content_type("application/json")
                .append_header((
                    "Content-Disposition",
                    format!("attachment; filename=\"{}\"", name),
                ))
                .body(content)
        }
        Err(e) => {
            error!("Failed to read {:?}: {}", output_path, e);
            HttpResponse::NotFound().body("Result file not generated yet.")
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    logger::init();

    let config = ScraperConfig::from_env()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let transport =
        HttpTransport::new().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let port = config.port;
    let retention = config.session_retention;
    let data_dir = config.data_dir.clone();

    let job_manager = Arc::new(JobManager::new(Arc::new(transport), config));
    let state = web::Data::new(AppState { job_manager: job_manager.clone(), data_dir });

    let reaper = job_manager.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            reaper.reap_finished(retention);
        }
    });

    info!("Starting Web Server at http://0.0.0.0:{}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .service(health_check)
            .service(start_scrape)
            .service(get_progress)
            .service(captcha_solved)
            .service(download_result)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_file_rejects_paths() {
        let dir = Path::new("data");
        assert_eq!(
            resolve_data_file(dir, "pahang_15.json"),
            Some(PathBuf::from("data/pahang_15.json"))
        );
        assert_eq!(resolve_data_file(dir, "../secrets.json"), None);
        assert_eq!(resolve_data_file(dir, "/etc/passwd"), None);
        assert_eq!(resolve_data_file(dir, "a/b.json"), None);
    }
}
