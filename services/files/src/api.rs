use crate::config::Config;
use crate::directory::StorageArea;
use crate::encoding::attachment_disposition;
use crate::error::StorageError;
use crate::export::{self, ExportError, EXPORT_FILE_NAME, XLSX_CONTENT_TYPE};
use crate::inventory::{self, InventoryEntry};
use crate::relay::{Relay, RelayTransport};
use crate::response::{upload_success, ApiResponse, RemoveData, UploadData};
use crate::store::{FileStore, RemoveOutcome};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Multipart framing allowance on top of the per-file upload limit
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FileStore>,
    pub relay: Arc<Relay>,
    pub settings: Arc<ApiSettings>,
}

/// Request-time settings derived from [`Config`]
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub max_upload_bytes: usize,
    pub public_base_url: String,
    pub public_prefix: String,
    pub default_transport: RelayTransport,
    pub read_timeout: Duration,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
}

impl ApiSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_upload_bytes: config.api.max_upload_bytes,
            public_base_url: config.api.public_base_url.clone(),
            public_prefix: config.api.public_prefix.clone(),
            default_transport: config.relay.default_transport,
            read_timeout: config.download_read_timeout(),
            cors_enabled: config.api.cors_enabled,
            cors_origins: config.api.cors_origins.clone(),
        }
    }
}

/// Errors returned by handlers, rendered as `{code, message}`
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("{0}")]
    BadRequest(String),

    #[error("File exceeds the upload limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Storage(e) => e.status_code(),
            ApiError::Multipart(e) => e.status(),
            ApiError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    fn client_message(&self) -> String {
        match self {
            ApiError::Storage(e) => e.client_message(),
            ApiError::Multipart(e) => e.body_text(),
            ApiError::Export(_) => "failed to build spreadsheet".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, status = %status, "Request failed");
        } else {
            warn!(error = %self, status = %status, "Request rejected");
        }

        (status, Json(ApiResponse::error(status, self.client_message()))).into_response()
    }
}

/// Query for endpoints addressing a single file
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub filename: Option<String>,
}

impl FileQuery {
    fn required_filename(self) -> Result<String, ApiError> {
        match self.filename {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(ApiError::BadRequest(
                "missing query parameter 'filename'".to_string(),
            )),
        }
    }
}

/// Query for `/nodeUploadFile`
#[derive(Debug, Deserialize)]
pub struct RelayQuery {
    pub filename: Option<String>,
    #[serde(rename = "type")]
    pub transport: Option<String>,
}

/// Create the API router
pub fn create_router(state: AppState, store_root: &std::path::Path) -> Router {
    let settings = state.settings.clone();

    let cors = if settings.cors_enabled {
        if settings.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = settings
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/saveFile", post(save_file))
        .route("/uploadFile", post(upload_file))
        .route("/nodeUploadFile", get(relay_file).post(relay_file))
        .route("/list", get(list_files))
        .route("/downloadFile", get(download_file))
        .route("/downloadExcel", get(download_excel))
        .route("/deleteFile", post(delete_file).delete(delete_file))
        .nest_service(&settings.public_prefix, ServeDir::new(store_root))
        .layer(DefaultBodyLimit::max(
            settings.max_upload_bytes + MULTIPART_OVERHEAD_BYTES,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "file-service"
    }))
}

/// Upload into the permanent store
async fn save_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<UploadData>>, ApiError> {
    receive_upload(&state, StorageArea::Store, multipart).await
}

/// Upload into the staging area
async fn upload_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<UploadData>>, ApiError> {
    receive_upload(&state, StorageArea::Staging, multipart).await
}

/// Read multipart field `file` and write it under its own file name
#[instrument(skip(state, area, multipart), fields(area = %area))]
async fn receive_upload(
    state: &AppState,
    area: StorageArea,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<UploadData>>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::BadRequest("multipart field 'file' has no file name".to_string())
            })?;
        let data = field.bytes().await?;

        let limit = state.settings.max_upload_bytes;
        if data.len() > limit {
            return Err(ApiError::PayloadTooLarge { limit });
        }

        let written = state.store.write_new(area, &name, data.as_ref()).await?;
        return Ok(Json(upload_success(&written)));
    }

    Err(ApiError::BadRequest(
        "missing multipart field 'file'".to_string(),
    ))
}

/// Relay a staged file into the permanent store and pass the upload
/// response through
#[instrument(skip(state))]
async fn relay_file(
    State(state): State<AppState>,
    Query(query): Query<RelayQuery>,
) -> Result<Response, ApiError> {
    let transport =
        RelayTransport::from_query(query.transport.as_deref(), state.settings.default_transport);
    let name = FileQuery {
        filename: query.filename,
    }
    .required_filename()?;

    let relayed = state.relay.relay(&name, transport).await?;

    let mut response = Response::new(Body::from(relayed.body));
    *response.status_mut() = relayed.status;
    if let Some(value) = relayed
        .content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

/// List the permanent store with derived kinds
#[instrument(skip(state))]
async fn list_files(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<InventoryEntry>>>, ApiError> {
    let entries = inventory::list_inventory(&state.store).await?;
    Ok(Json(ApiResponse::success("", entries)))
}

/// Stream a permanent-store file as an attachment
#[instrument(skip(state))]
async fn download_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Response, ApiError> {
    let name = query.required_filename()?;

    // Open before sending headers so a missing file is a clean 404
    let (file, size_bytes) = state.store.open(StorageArea::Store, &name).await?;
    metrics::counter!("files.downloads").increment(1);

    let body = Body::from_stream(timed_chunks(file, state.settings.read_timeout));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, attachment_disposition(&name)),
            (header::CONTENT_LENGTH, size_bytes.to_string()),
        ],
        body,
    )
        .into_response())
}

/// Chunks of `reader`, each read bounded by `read_timeout`.
///
/// A read error or timeout ends the stream with an error, which aborts the
/// response body. Dropping the stream (client disconnect) closes the file.
fn timed_chunks<R>(
    reader: R,
    read_timeout: Duration,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static
where
    R: AsyncRead + Send + Unpin + 'static,
{
    futures::stream::unfold(Some(ReaderStream::new(reader)), move |chunks| async move {
        let mut chunks = chunks?;
        match tokio::time::timeout(read_timeout, chunks.next()).await {
            Ok(Some(Ok(bytes))) => Some((Ok(bytes), Some(chunks))),
            Ok(Some(Err(e))) => {
                warn!(error = %e, "Download read failed, aborting transfer");
                Some((Err(e), None))
            }
            Ok(None) => None,
            Err(_) => {
                warn!(timeout = ?read_timeout, "Download read timed out, aborting transfer");
                Some((
                    Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "file read timed out",
                    )),
                    None,
                ))
            }
        }
    })
}

/// Export the inventory as an xlsx workbook
#[instrument(skip(state))]
async fn download_excel(State(state): State<AppState>) -> Result<Response, ApiError> {
    let entries = inventory::list_inventory(&state.store).await?;
    let workbook = export::build_workbook(
        &entries,
        &state.settings.public_base_url,
        &state.settings.public_prefix,
    )?;

    info!(files = entries.len(), "Inventory exported");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                attachment_disposition(EXPORT_FILE_NAME),
            ),
        ],
        workbook,
    )
        .into_response())
}

/// Delete a file from the staging area
#[instrument(skip(state))]
async fn delete_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Json<ApiResponse<RemoveData>>, ApiError> {
    let name = query.required_filename()?;
    let outcome = state.store.remove(StorageArea::Staging, &name).await?;
    metrics::counter!("files.deletes").increment(1);

    let (message, removed) = match outcome {
        RemoveOutcome::Removed => ("deleted", true),
        RemoveOutcome::Absent => ("file not found, nothing to delete", false),
    };

    Ok(Json(ApiResponse::success(message, RemoveData { removed })))
}

/// Serve the API until `shutdown` resolves
pub async fn start_api_server<F>(
    state: AppState,
    config: &Config,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let store_root = state
        .store
        .directory(StorageArea::Store)
        .root()
        .to_path_buf();
    let router = create_router(state, &store_root);
    let addr = format!("{}:{}", config.api.host, config.api.port);

    info!(address = %addr, "Starting file API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
