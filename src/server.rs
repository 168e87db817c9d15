//! HTTP surface.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | GET    | `/`            | service banner |
//! | GET    | `/health`      | detector state |
//! | POST   | `/extract`     | multipart upload → [`ExtractionResult`] |
//! | DELETE | `/cleanup`     | empty the staging directory |
//! | GET    | `/extracted/*` | crop files |

use crate::error::{ErrorKind, ExtractError};
use crate::extract::{Extractor, Upload, EXTRACTED_URL_PREFIX};
use crate::output::{CleanupReport, ExtractionResult, HealthReport};
use axum::{
    extract::{rejection::QueryRejection, DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use axum_extra::extract::multipart::MultipartRejection;
use axum_extra::extract::Multipart;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
struct AppState {
    extractor: Arc<Extractor>,
}

/// Build the router. The crop directory is served from
/// `extractor.config().extracted_dir()`.
pub fn create_app(extractor: Arc<Extractor>) -> Router {
    let config = extractor.config();
    let extracted = ServeDir::new(config.extracted_dir());
    let body_limit = config.max_upload_bytes;

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/extract", post(extract_handler))
        .route("/cleanup", delete(cleanup_handler))
        .nest_service(EXTRACTED_URL_PREFIX, extracted)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(AppState { extractor })
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(extractor: Arc<Extractor>, addr: SocketAddr) -> std::io::Result<()> {
    let app = create_app(extractor);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Document field extractor listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn root_handler() -> Json<Value> {
    Json(json!({
        "message": "Document field extraction API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/extract": "POST - Upload a PDF or image to extract photo and signature",
            "/health": "GET - Health check",
            "/cleanup": "DELETE - Remove staged uploads",
            "/extracted/{file}": "GET - Fetch an extracted crop",
        }
    }))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.extractor.health())
}

#[derive(Debug, Default, Deserialize)]
struct ExtractQuery {
    page_number: Option<u32>,
}

/// Extractor rejections are turned into [`ExtractError::MalformedUpload`] so
/// they share the JSON 400 body.
async fn extract_handler(
    State(state): State<AppState>,
    query: Result<Query<ExtractQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ExtractionResult>, ApiError> {
    let Query(query) = query.map_err(|e| ExtractError::MalformedUpload(e.to_string()))?;
    let multipart = multipart.map_err(|e| ExtractError::MalformedUpload(e.to_string()))?;
    let upload = read_upload(multipart, query.page_number).await?;
    info!(
        "Processing file: {} ({} bytes)",
        upload.filename,
        upload.bytes.len()
    );
    let result = state.extractor.extract(upload).await?;
    Ok(Json(result))
}

/// Pull the `file` part and an optional `page_number` part out of the body.
/// A `page_number` form field overrides the query parameter.
async fn read_upload(
    mut multipart: Multipart,
    query_page: Option<u32>,
) -> Result<Upload, ExtractError> {
    let malformed = |e: &dyn std::fmt::Display| ExtractError::MalformedUpload(e.to_string());

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut page_number = query_page;

    while let Some(field) = multipart.next_field().await.map_err(|e| malformed(&e))? {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|e| malformed(&e))?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("page_number") => {
                let text = field.text().await.map_err(|e| malformed(&e))?;
                let text = text.trim();
                if !text.is_empty() {
                    let page = text.parse::<u32>().map_err(|_| {
                        ExtractError::MalformedUpload(format!(
                            "page_number '{text}' is not a positive integer"
                        ))
                    })?;
                    page_number = Some(page);
                }
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or(ExtractError::MissingFile)?;
    Ok(Upload {
        filename,
        bytes,
        page_number,
    })
}

async fn cleanup_handler(State(state): State<AppState>) -> Result<Json<CleanupReport>, ApiError> {
    let report = state.extractor.cleanup().await?;
    info!("{}", report.message);
    Ok(Json(report))
}

/// Maps an [`ExtractError`] onto a status code and body by its kind.
#[derive(Debug)]
pub struct ApiError(pub ExtractError);

impl From<ExtractError> for ApiError {
    fn from(e: ExtractError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, body) = match self.0.kind() {
            ErrorKind::Validation => {
                warn!("Rejected upload: {}", message);
                (StatusCode::BAD_REQUEST, json!({ "detail": message }))
            }
            ErrorKind::Conversion => {
                error!("PDF conversion failed: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "detail": format!("PDF conversion failed: {message}") }),
                )
            }
            ErrorKind::Inference => {
                error!("Error during inference: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "success": false, "error": message, "fields": {} }),
                )
            }
            ErrorKind::Internal => {
                error!("Error processing request: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "detail": message }))
            }
        };
        (status, Json(body)).into_response()
    }
}
