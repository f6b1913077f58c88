//! Web server module for the broker.
//!
//! JSON API over the group registry and the stored readings. Every error
//! body has the shape `{"error": "..."}`.

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::config::validate_sensor_url;
use crate::group::{GroupError, GroupRegistry, GroupView, RegistryError, SensorRef};
use crate::storage::db::SqlitePool;
use crate::storage::{
    Event, EventKind, EventQuery, EventReader, EventSeverity, MAX_LIMIT, ReadingQuery,
    ReadingReader, SortOrder, StorageError, StoredReading,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<GroupRegistry>,
    pub reading_reader: ReadingReader,
    pub event_reader: EventReader,
    pub pool: SqlitePool,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Error returned by API handlers, rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(_) => Self::NotFound(e.to_string()),
            RegistryError::AlreadyExists(_)
            | RegistryError::Group(GroupError::DuplicateSensor(_))
            | RegistryError::Group(GroupError::AlreadyStarted(_)) => Self::Conflict(e.to_string()),
            RegistryError::InvalidId => Self::BadRequest(e.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

// =============================================================================
// Request / Response Types
// =============================================================================

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
}

/// Body of `POST /api/group`.
#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
}

/// Body of `POST /api/group/{id}`.
#[derive(Debug, Deserialize)]
pub struct AddSensorRequest {
    pub name: String,
    pub url: String,
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: String,
}

/// Query parameters for the group readings API.
///
/// Kept as strings so malformed values produce a JSON error body.
#[derive(Debug, Default, Deserialize)]
pub struct ReadingsQueryParams {
    pub limit: Option<String>,
    pub order: Option<String>,
}

/// Query parameters for the events API.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQueryParams {
    pub source: Option<String>,
    pub kind: Option<String>,
    pub severity: Option<String>,
    pub limit: Option<String>,
    pub order: Option<String>,
}

fn parse_limit(raw: Option<&str>) -> Result<Option<u32>, ApiError> {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    match raw.parse::<u32>() {
        Ok(limit) if (1..=MAX_LIMIT).contains(&limit) => Ok(Some(limit)),
        _ => Err(ApiError::BadRequest(format!(
            "invalid limit '{raw}': expected an integer between 1 and {MAX_LIMIT}"
        ))),
    }
}

fn parse_enum<T: FromStr>(name: &str, raw: Option<&str>) -> Result<Option<T>, ApiError> {
    match raw.filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => T::from_str(raw)
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("invalid {name} '{raw}'"))),
    }
}

// =============================================================================
// Router
// =============================================================================

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/api/about", get(about_handler))
        .route(
            "/api/group",
            get(group_list_handler).post(group_create_handler),
        )
        .route(
            "/api/group/{id}",
            get(group_readings_handler)
                .post(group_add_sensor_handler)
                .delete(group_delete_handler),
        )
        .route("/api/events", get(events_handler))
        .fallback(not_found_handler)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        db: None,
    })
}

/// Readiness probe that checks the database answers.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pool.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ready",
            db: Some("ok".to_string()),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready",
                    db: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

async fn about_handler() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

async fn group_create_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateGroupRequest>, JsonRejection>,
) -> Result<Json<GroupView>, ApiError> {
    let Json(req) = body?;
    let group = state.registry.create(&req.name).await?;
    tracing::info!(group = %group.id(), "Group created via API");
    Ok(Json(group.snapshot().await))
}

async fn group_add_sensor_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<AddSensorRequest>, JsonRejection>,
) -> Result<Json<GroupView>, ApiError> {
    let Json(req) = body?;
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("sensor name cannot be empty".into()));
    }
    validate_sensor_url(&req.url).map_err(ApiError::BadRequest)?;

    let group = state
        .registry
        .add_sensor(&id, SensorRef::new(req.name, req.url))
        .await?;
    Ok(Json(group.snapshot().await))
}

async fn group_readings_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ReadingsQueryParams>,
) -> Result<Json<Vec<StoredReading>>, ApiError> {
    let limit = parse_limit(params.limit.as_deref())?;
    let order = parse_enum::<SortOrder>("order", params.order.as_deref())?;
    state.registry.get(&id).await?;

    let readings = state
        .reading_reader
        .query(ReadingQuery {
            group: id,
            limit,
            order,
        })
        .await?;
    Ok(Json(readings))
}

async fn group_list_handler(State(state): State<Arc<AppState>>) -> Json<Vec<GroupView>> {
    let groups = state.registry.list().await;
    let mut views = Vec::with_capacity(groups.len());
    for group in groups {
        views.push(group.snapshot().await);
    }
    Json(views)
}

async fn group_delete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    state.registry.delete(&id).await?;
    Ok(Json(DeletedResponse { deleted: id }))
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsQueryParams>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let query = EventQuery {
        source: params.source.filter(|s| !s.is_empty()),
        kind: parse_enum::<EventKind>("kind", params.kind.as_deref())?,
        severity: parse_enum::<EventSeverity>("severity", params.severity.as_deref())?,
        limit: parse_limit(params.limit.as_deref())?,
        order: parse_enum::<SortOrder>("order", params.order.as_deref())?,
    };
    Ok(Json(state.event_reader.query(query).await?))
}

async fn not_found_handler() -> ApiError {
    ApiError::NotFound("404 Not Found".to_string())
}
