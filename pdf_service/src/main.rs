mod config;
mod worker;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::Engine as _;
use bytes::Bytes;
use config::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;
use wkhtmltopdf::{Diagnostic, DiagnosticLevel, PdfError, Wkhtmltopdf};
use worker::{ConversionJob, EngineInfo, JobError, JobObject, WorkerHandle};

#[derive(Clone)]
struct AppState {
    worker: WorkerHandle,
    engine: EngineInfo,
}

/// API error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    details: Option<String>,
}

/// Conversion request
#[derive(Debug, Deserialize)]
struct ConvertRequest {
    /// Global settings, e.g. `{"size.paperSize": "A4"}`
    #[serde(default)]
    global: BTreeMap<String, String>,

    /// Objects rendered in order
    objects: Vec<ObjectRequest>,
}

#[derive(Debug, Deserialize)]
struct ObjectRequest {
    #[serde(default)]
    settings: BTreeMap<String, String>,

    /// Inline HTML; when absent the `page` setting names the source
    html: Option<String>,
}

/// Conversion response
#[derive(Debug, Serialize)]
struct ConvertResponse {
    job_id: String,
    bytes: usize,
    http_error_code: i32,
    warnings: Vec<String>,
    diagnostics: Vec<Diagnostic>,

    /// Base64-encoded PDF
    pdf: String,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    engine: String,
    wkhtmltopdf_version: String,
    extended_qt: bool,
}

enum AppError {
    Job(JobError),
    InvalidRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match self {
            AppError::Job(JobError::Busy) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Conversion queue is full".to_string(),
                None,
            ),
            AppError::Job(JobError::Unavailable) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Converter unavailable".to_string(),
                None,
            ),
            AppError::Job(JobError::Pdf(
                e @ (PdfError::Settings { .. } | PdfError::InvalidString(_) | PdfError::SettingsJson(_)),
            )) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Invalid settings".to_string(),
                Some(e.to_string()),
            ),
            AppError::Job(JobError::Pdf(e @ PdfError::ConversionFailed { .. })) => (
                StatusCode::BAD_GATEWAY,
                "Conversion failed".to_string(),
                Some(e.to_string()),
            ),
            AppError::Job(JobError::Pdf(e)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Converter error".to_string(),
                Some(e.to_string()),
            ),
            AppError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "Invalid request".to_string(),
                Some(msg),
            ),
        };

        let error_response = ErrorResponse {
            error: error_message,
            details,
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        AppError::Job(err)
    }
}

/// Health check endpoint
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine: state.engine.name.clone(),
        wkhtmltopdf_version: state.engine.version.clone(),
        extended_qt: state.engine.extended_qt,
    })
}

/// JSON conversion endpoint, answers with the PDF base64-encoded
async fn convert(
    State(state): State<AppState>,
    request: Result<Json<ConvertRequest>, JsonRejection>,
) -> Result<Json<ConvertResponse>, AppError> {
    let Json(request) = request.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    if request.objects.is_empty() {
        return Err(AppError::InvalidRequest("At least one object is required".to_string()));
    }

    let id = Uuid::new_v4();
    info!("Starting conversion job: {}", id);

    let job = ConversionJob {
        id,
        global: request.global,
        objects: request
            .objects
            .into_iter()
            .map(|object| JobObject {
                settings: object.settings,
                html: object.html,
            })
            .collect(),
    };
    let outcome = state.worker.submit(job).await?;

    let warnings = outcome
        .diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Warning)
        .map(|d| d.message.clone())
        .collect();

    Ok(Json(ConvertResponse {
        job_id: id.to_string(),
        bytes: outcome.pdf.len(),
        http_error_code: outcome.http_error_code,
        warnings,
        diagnostics: outcome.diagnostics,
        pdf: base64::engine::general_purpose::STANDARD.encode(&outcome.pdf),
    }))
}

/// Multipart conversion endpoint, answers with the raw PDF
///
/// Accepts multipart form data with:
/// - `page`: HTML file, rendered inline (repeatable)
/// - `url`: page URL or path (repeatable)
/// - `global`: JSON object of global settings (optional)
async fn render(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response, AppError> {
    let id = Uuid::new_v4();
    info!("Starting render job: {}", id);

    let mut global = BTreeMap::new();
    let mut objects = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "page" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::InvalidRequest(e.to_string()))?;
                let html = String::from_utf8(data.to_vec())
                    .map_err(|_| AppError::InvalidRequest("Page must be UTF-8 HTML".to_string()))?;
                objects.push(JobObject {
                    settings: BTreeMap::new(),
                    html: Some(html),
                });
            }
            "url" => {
                let url = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidRequest(e.to_string()))?;
                objects.push(JobObject {
                    settings: BTreeMap::from([("page".to_string(), url)]),
                    html: None,
                });
            }
            "global" => {
                let data = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidRequest(e.to_string()))?;
                global = serde_json::from_str(&data)
                    .map_err(|e| AppError::InvalidRequest(format!("Invalid global settings JSON: {}", e)))?;
            }
            _ => {
                info!("Ignoring unknown field: {}", name);
            }
        }
    }

    if objects.is_empty() {
        return Err(AppError::InvalidRequest("No page or url provided".to_string()));
    }

    let outcome = state
        .worker
        .submit(ConversionJob { id, global, objects })
        .await?;

    let headers = [
        (header::CONTENT_TYPE, mime::APPLICATION_PDF.to_string()),
        (HeaderName::from_static("x-job-id"), id.to_string()),
    ];
    Ok((headers, Bytes::from(outcome.pdf)).into_response())
}

fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/convert", post(convert))
        .route("/render", post(render))
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(feature = "native")]
fn open_engine(use_graphics: bool) -> wkhtmltopdf::Result<Wkhtmltopdf> {
    Wkhtmltopdf::init(use_graphics)
}

#[cfg(not(feature = "native"))]
fn open_engine(_use_graphics: bool) -> wkhtmltopdf::Result<Wkhtmltopdf> {
    tracing::warn!("Built without the `native` feature; serving PDFs from the scripted engine");
    Ok(Wkhtmltopdf::with_engine(wkhtmltopdf::ScriptedEngine::new()))
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_service=info,wkhtmltopdf=info,tower_http=debug".into()),
        )
        .init();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("PDF Service starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let use_graphics = config.use_graphics;
    let (worker, engine) = match worker::spawn(config.queue_depth, move || open_engine(use_graphics)).await {
        Ok(started) => started,
        Err(e) => {
            error!("Failed to start converter: {}", e);
            std::process::exit(1);
        }
    };
    info!("Engine: {} {}", engine.name, engine.version);

    let app = router(AppState { worker, engine }, config.max_body_bytes);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .expect("Failed to bind to address");

    info!("Server listening on http://{}", config.addr);
    info!("Endpoints:");
    info!("  GET  /health  - Health check");
    info!("  POST /convert - Convert JSON-described objects");
    info!("  POST /render  - Convert uploaded HTML pages");

    axum::serve(listener, app)
        .await
        .expect("Server failed");
}
