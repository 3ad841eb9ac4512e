//! REST API boundary
//!
//! Endpoints for async form analysis (create, poll, fetch actions,
//! delete) and file management (upload, list, delete). Authentication is
//! bearer-token based; see [`crate::auth`].

use crate::auth::{AuthService, AuthUser};
use crate::config::{UploadConfig, ALLOWED_CONTENT_TYPES};
use crate::error::Error;
use crate::ingest::IngestionService;
use crate::lifecycle::RequestLifecycle;
use crate::pipeline::AnalyzePayload;
use crate::store::files::{FileInfo, FileStore};
use crate::store::requests::{ProgressEvent, RequestStatus, StoredAction};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<RequestLifecycle>,
    pub files: FileStore,
    pub ingest: Arc<IngestionService>,
    pub auth: AuthService,
    pub uploads: UploadConfig,
}

/// Response for an accepted analysis request
#[derive(Debug, Serialize)]
pub struct AnalyzeAcceptedResponse {
    pub request_id: String,
    pub status: &'static str,
}

/// Status endpoint response
#[derive(Debug, Serialize)]
pub struct RequestStatusResponse {
    pub request_id: String,
    pub status: RequestStatus,
    pub fields_detected: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub progress: Vec<ProgressEventView>,
}

/// One progress event as exposed over HTTP
#[derive(Debug, Serialize)]
pub struct ProgressEventView {
    pub stage: String,
    pub message: String,
    pub progress: Option<i64>,
    pub payload: Option<serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<ProgressEvent> for ProgressEventView {
    fn from(event: ProgressEvent) -> Self {
        Self {
            stage: event.stage,
            message: event.message,
            progress: event.progress,
            payload: event.payload,
            created_at: event.created_at,
        }
    }
}

/// Actions endpoint response
#[derive(Debug, Serialize)]
pub struct RequestActionsResponse {
    pub request_id: String,
    pub status: RequestStatus,
    pub actions: Vec<StoredAction>,
}

/// Upload request body: a single base64-encoded file
#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: String,
    pub data: String,
}

/// Upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file_id: String,
    pub status: &'static str,
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// API error mapped onto status codes
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Invalid or missing credentials")
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not found")
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match &e {
            Error::Conflict(message) => Self::new(StatusCode::CONFLICT, message.clone()),
            Error::NotFound(_) => Self::not_found(),
            _ => {
                error!("Internal error: {}", e);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/form/analyze/async", post(analyze_async))
        .route("/form/request/{id}/status", get(request_status))
        .route("/form/request/{id}/actions", get(request_actions))
        .route("/form/request/{id}", delete(delete_request))
        .route("/files/upload", post(upload_file))
        .route("/files", get(list_files))
        .route("/files/{id}", delete(delete_file))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = bearer else {
        return Err(ApiError::unauthorized());
    };

    state
        .auth
        .resolve_bearer(token)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(ApiError::unauthorized)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "version": crate::VERSION}))
}

/// POST /form/analyze/async
async fn analyze_async(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&state, &headers).await?;

    // Schema violations (unknown quality, missing html) are a client error
    let payload: AnalyzePayload = serde_json::from_value(body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid request body: {e}")))?;

    let request = state
        .lifecycle
        .schedule(&user.id, payload, user.personal_instructions)
        .await?;

    info!("Accepted analysis request {} for user {}", request.id, user.id);
    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeAcceptedResponse {
            request_id: request.id,
            status: "pending",
        }),
    ))
}

/// GET /form/request/{id}/status
async fn request_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<RequestStatusResponse>, ApiError> {
    let user = require_user(&state, &headers).await?;

    let request = state
        .lifecycle
        .store()
        .get(&id, Some(&user.id))
        .await?
        .ok_or_else(ApiError::not_found)?;

    let progress = state.lifecycle.store().list_progress(&id).await?;

    Ok(Json(RequestStatusResponse {
        request_id: request.id,
        status: request.status,
        fields_detected: request.fields_detected,
        error_message: request.error_message,
        created_at: request.created_at,
        started_at: request.started_at,
        completed_at: request.completed_at,
        progress: progress.into_iter().map(Into::into).collect(),
    }))
}

/// GET /form/request/{id}/actions
async fn request_actions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<RequestActionsResponse>, ApiError> {
    let user = require_user(&state, &headers).await?;

    let request = state
        .lifecycle
        .store()
        .get(&id, Some(&user.id))
        .await?
        .ok_or_else(ApiError::not_found)?;

    let actions = if request.status == RequestStatus::Completed {
        state.lifecycle.store().get_actions(&id).await?
    } else {
        Vec::new()
    };

    Ok(Json(RequestActionsResponse {
        request_id: request.id,
        status: request.status,
        actions,
    }))
}

/// DELETE /form/request/{id}
async fn delete_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&state, &headers).await?;

    // Stop the pipeline first so nothing writes to the row mid-delete
    state.lifecycle.cancel(&id).await;

    let deleted = state.lifecycle.store().delete(&id, Some(&user.id)).await?;
    if !deleted {
        return Err(ApiError::not_found());
    }

    Ok(StatusCode::NO_CONTENT)
}

/// POST /files/upload
async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<UploadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&state, &headers).await?;

    if !ALLOWED_CONTENT_TYPES.contains(&body.content_type.as_str()) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Unsupported content type: {}", body.content_type),
        ));
    }

    let data = base64::engine::general_purpose::STANDARD
        .decode(body.data.trim())
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "Invalid base64 payload"))?;

    if data.len() > state.uploads.max_file_size {
        return Err(ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "File exceeds the maximum upload size",
        ));
    }

    let file_id = state
        .files
        .create(&user.id, &body.filename, &body.content_type, data)
        .await?;

    // Index in the background; the file row tracks progress
    let ingest = state.ingest.clone();
    let user_id = user.id.clone();
    let spawned_id = file_id.clone();
    tokio::spawn(async move {
        ingest.process_file(&spawned_id, &user_id).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            file_id,
            status: "pending",
        }),
    ))
}

/// GET /files
async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<FileInfo>>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let files = state.files.list_for_user(&user.id).await?;
    Ok(Json(files))
}

/// DELETE /files/{id}
async fn delete_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&state, &headers).await?;

    let deleted = state.ingest.delete_file(&id, &user.id).await?;
    if !deleted {
        return Err(ApiError::not_found());
    }

    Ok(StatusCode::NO_CONTENT)
}
