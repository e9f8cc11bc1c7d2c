//! HTTP surface: routes, multipart form parsing and the response envelope.

use crate::asset_uploader::ImageUpload;
use crate::config::ApiConfig;
use crate::error::{GifGroupError, Result as CoreResult};
use crate::kv_store::KvStore;
use crate::service::GifGroupService;
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: GifGroupService,
    pub kv_store: Arc<dyn KvStore>,
    /// Cancelled when the process begins shutting down
    pub shutdown: CancellationToken,
    pub request_timeout: Duration,
}

/// Response body for every API route
#[derive(Debug, Serialize)]
pub struct ResponseEnvelope<T> {
    pub content: Option<T>,
    pub error_code: u16,
    pub error_text: String,
    pub status_code: u16,
    pub status_text: String,
    pub success: bool,
}

impl<T> ResponseEnvelope<T> {
    pub fn ok(content: T) -> Self {
        Self {
            content: Some(content),
            error_code: 0,
            error_text: "No Error".to_string(),
            status_code: StatusCode::OK.as_u16(),
            status_text: status_text(StatusCode::OK),
            success: true,
        }
    }

    pub fn from_error(err: &GifGroupError) -> Self {
        let status = status_for(err);
        Self {
            content: None,
            error_code: err.error_code(),
            error_text: err.error_text(),
            status_code: status.as_u16(),
            status_text: status_text(status),
            success: false,
        }
    }

    fn from_result(result: CoreResult<T>) -> Self {
        match result {
            Ok(content) => Self::ok(content),
            Err(e) => {
                if e.is_client_error() {
                    warn!(error = %e, "Request rejected");
                } else {
                    error!(error = %e, "Request failed");
                }
                Self::from_error(&e)
            }
        }
    }
}

impl<T: Serialize> IntoResponse for ResponseEnvelope<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// HTTP status for a core failure
pub fn status_for(err: &GifGroupError) -> StatusCode {
    match err {
        GifGroupError::MissingImage
        | GifGroupError::InvalidId(_)
        | GifGroupError::InvalidForm(_) => StatusCode::BAD_REQUEST,
        GifGroupError::StoreConnection(_) | GifGroupError::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        GifGroupError::StoreScan(_)
        | GifGroupError::StoreWrite(_)
        | GifGroupError::Decode { .. }
        | GifGroupError::Upload(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn status_text(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or_default().to_string()
}

/// Cancellation scope for one request: fires on shutdown or deadline
struct RequestScope {
    token: CancellationToken,
    deadline: JoinHandle<()>,
}

impl RequestScope {
    fn new(state: &AppState) -> Self {
        let token = state.shutdown.child_token();
        let timeout = state.request_timeout;
        let deadline = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        };

        Self { token, deadline }
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.deadline.abort();
    }
}

/// Fields accepted by the create endpoints
#[derive(Debug, Default)]
struct CreateForm {
    name: String,
    image: Option<ImageUpload>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
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
        .route("/ready", get(readiness_check))
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/:id/gifs", get(list_group_gifs).post(create_gif))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "gifgroup-api"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.kv_store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "store": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// List all groups
#[instrument(skip(state))]
async fn list_groups(State(state): State<AppState>) -> impl IntoResponse {
    let scope = RequestScope::new(&state);
    let result = state.service.list_groups(&scope.token).await;
    ResponseEnvelope::from_result(result)
}

/// List the gifs of one group
#[instrument(skip(state))]
async fn list_group_gifs(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> impl IntoResponse {
    let scope = RequestScope::new(&state);
    let result = match parse_group_id(&raw_id) {
        Ok(group_id) => state.service.list_group_gifs(group_id, &scope.token).await,
        Err(e) => Err(e),
    };
    ResponseEnvelope::from_result(result)
}

/// Create a group from an optional `name` field and optional `image` file
#[instrument(skip(state, multipart))]
async fn create_group(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> impl IntoResponse {
    let scope = RequestScope::new(&state);
    let result = async {
        let form = read_form(multipart).await?;
        state
            .service
            .create_group(&form.name, form.image, &scope.token)
            .await
    }
    .await;
    ResponseEnvelope::from_result(result)
}

/// Create a gif in a group from a required `image` file
#[instrument(skip(state, multipart))]
async fn create_gif(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> impl IntoResponse {
    let scope = RequestScope::new(&state);
    let result = async {
        let group_id = parse_group_id(&raw_id)?;
        let form = read_form(multipart).await?;
        state
            .service
            .create_gif(group_id, form.image, &scope.token)
            .await
    }
    .await;
    ResponseEnvelope::from_result(result)
}

fn parse_group_id(raw: &str) -> CoreResult<u64> {
    raw.parse::<u64>()
        .map_err(|_| GifGroupError::InvalidId(raw.to_string()))
}

/// Collect `name` and `image` from a multipart body.
///
/// A request that is not multipart at all is treated as an empty form. A
/// file field with neither a filename nor bytes counts as no image.
async fn read_form(multipart: Result<Multipart, MultipartRejection>) -> CoreResult<CreateForm> {
    let mut form = CreateForm::default();

    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            debug!(reason = %rejection.body_text(), "Request is not multipart");
            return Ok(form);
        }
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GifGroupError::InvalidForm(e.body_text()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "name" => {
                form.name = field
                    .text()
                    .await
                    .map_err(|e| GifGroupError::InvalidForm(e.body_text()))?;
            }
            "image" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| GifGroupError::MissingImage)?;

                if filename.is_empty() && bytes.is_empty() {
                    continue;
                }

                form.image = Some(ImageUpload {
                    filename,
                    content_type,
                    bytes,
                });
            }
            other => {
                debug!(field = %other, "Ignoring unknown form field");
            }
        }
    }

    Ok(form)
}

/// Start the API server; returns once `shutdown` fires and in-flight
/// requests have drained
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting gifgroup API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}
