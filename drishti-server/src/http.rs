// HTTP control API over the camera service

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use drishti_eye::error::{SettingsValidationError, SnapshotError};
use drishti_eye::settings::CameraSettings;
use drishti_eye::snapshot::Snapshot;
use drishti_eye::CameraService;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<CameraService>,
}

impl ApiState {
    pub fn new(service: Arc<CameraService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub cameras: usize,
    pub streaming: usize,
}

#[derive(Debug, Deserialize)]
pub struct SettingRequest {
    pub camera_id: String,
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Serialize)]
pub struct SettingResponse {
    pub success: bool,
    pub camera_id: String,
    pub settings: CameraSettings,
}

#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub camera_id: String,
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
}

impl From<Snapshot> for SnapshotResponse {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            camera_id: snapshot.camera_id.to_string(),
            filename: snapshot.filename,
            timestamp: snapshot.timestamp,
            path: snapshot.path.display().to_string(),
        }
    }
}

/// Failure of an API call, mapped onto a status code
#[derive(Debug)]
pub enum ApiError {
    Settings(SettingsValidationError),
    Snapshot(SnapshotError),
    /// Name not in the snapshot index
    UnknownSnapshot(String),
    /// Indexed snapshot whose file could not be read
    SnapshotFile(std::io::Error),
}

impl From<SettingsValidationError> for ApiError {
    fn from(err: SettingsValidationError) -> Self {
        ApiError::Settings(err)
    }
}

impl From<SnapshotError> for ApiError {
    fn from(err: SnapshotError) -> Self {
        ApiError::Snapshot(err)
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Settings(SettingsValidationError::UnknownCamera(_)) => {
                (StatusCode::NOT_FOUND, "UNKNOWN_CAMERA", self.message())
            }
            ApiError::Settings(_) => (StatusCode::BAD_REQUEST, "INVALID_SETTING", self.message()),
            ApiError::Snapshot(SnapshotError::UnknownCamera(_)) => {
                (StatusCode::NOT_FOUND, "UNKNOWN_CAMERA", self.message())
            }
            ApiError::Snapshot(SnapshotError::NoFrameAvailable { .. }) => {
                (StatusCode::CONFLICT, "NO_FRAME", self.message())
            }
            // storage details stay in the log
            ApiError::Snapshot(SnapshotError::Storage(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                "Failed to store snapshot".to_string(),
            ),
            ApiError::UnknownSnapshot(_) => (StatusCode::NOT_FOUND, "UNKNOWN_SNAPSHOT", self.message()),
            ApiError::SnapshotFile(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (StatusCode::NOT_FOUND, "UNKNOWN_SNAPSHOT", "Snapshot file is gone".to_string())
            }
            ApiError::SnapshotFile(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                "Failed to read snapshot".to_string(),
            ),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Settings(e) => e.to_string(),
            ApiError::Snapshot(e) => e.to_string(),
            ApiError::UnknownSnapshot(name) => format!("Unknown snapshot: {}", name),
            ApiError::SnapshotFile(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            error!(error = %self.message(), code, "API request failed");
        }
        let body = Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        });
        (status, body).into_response()
    }
}

/// Create HTTP router with all API routes
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/cameras", get(list_cameras_handler))
        .route("/api/cameras/:camera_id/latest.jpg", get(latest_jpeg_handler))
        .route("/api/settings", get(get_settings_handler).post(update_setting_handler))
        .route("/api/snapshots", get(list_snapshots_handler))
        .route("/api/snapshots/:camera_id", post(take_snapshot_handler))
        .route("/api/snapshots/files/:filename", get(snapshot_file_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let cameras = state.service.list_cameras();
    let streaming = cameras.values().filter(|c| c.state.is_streaming()).count();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cameras: cameras.len(),
        streaming,
    })
}

async fn list_cameras_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.service.list_cameras())
}

async fn get_settings_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.service.settings())
}

async fn update_setting_handler(
    State(state): State<ApiState>,
    Json(request): Json<SettingRequest>,
) -> Result<Json<SettingResponse>, ApiError> {
    let settings = state
        .service
        .update_setting(&request.camera_id, &request.key, &request.value)?;
    Ok(Json(SettingResponse {
        success: true,
        camera_id: request.camera_id,
        settings,
    }))
}

async fn take_snapshot_handler(
    State(state): State<ApiState>,
    Path(camera_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.service.take_snapshot(&camera_id).await?;
    info!(camera_id = %camera_id, filename = %snapshot.filename, "Snapshot taken via API");
    Ok((StatusCode::CREATED, Json(SnapshotResponse::from(snapshot))))
}

async fn list_snapshots_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshots: Vec<SnapshotResponse> = state
        .service
        .list_snapshots()
        .into_iter()
        .map(SnapshotResponse::from)
        .collect();
    Json(snapshots)
}

async fn latest_jpeg_handler(
    State(state): State<ApiState>,
    Path(camera_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let jpeg = state.service.latest_jpeg(&camera_id)?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        jpeg,
    ))
}

/// Serve a stored snapshot. Only names present in the index are served; the
/// requested name is never joined onto a directory.
async fn snapshot_file_handler(
    State(state): State<ApiState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .service
        .snapshot(&filename)
        .ok_or(ApiError::UnknownSnapshot(filename))?;
    let bytes = tokio::fs::read(&snapshot.path)
        .await
        .map_err(ApiError::SnapshotFile)?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}
