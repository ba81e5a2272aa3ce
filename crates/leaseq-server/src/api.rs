//! HTTP API
//!
//! | Method | Path             | Engine op |
//! |--------|------------------|-----------|
//! | POST   | `/tasks`         | enqueue   |
//! | GET    | `/tasks?timeout` | dequeue   |
//! | PUT    | `/tasks/{key}`   | confirm   |
//! | GET    | `/tasks/status`  | status    |
//! | GET    | `/tasks/next`    | peek      |
//!
//! エンジンは同期 API なので、呼び出しは spawn_blocking で runtime の外に出す。

use std::sync::Arc;

use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use leaseq_core::{LeaseQueue, QueueError, QueueStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinError;
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<LeaseQueue>,
}

impl AppState {
    pub fn new(queue: Arc<LeaseQueue>) -> Self {
        Self { queue }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/tasks", get(dequeue).post(enqueue))
        .route("/tasks/status", get(status))
        .route("/tasks/next", get(peek))
        .route("/tasks/", put(confirm_without_key))
        .route("/tasks/{key}", put(confirm))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler error: a rejected request or an engine failure.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    Queue(QueueError),
    /// The blocking task running the engine call panicked or was cancelled.
    Join(JoinError),
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::Queue(err)
    }
}

impl From<JoinError> for ApiError {
    fn from(err: JoinError) -> Self {
        ApiError::Join(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.to_string()),
            ApiError::Queue(err) if err.is_not_found() => (StatusCode::NOT_FOUND, err.to_string()),
            ApiError::Queue(err @ QueueError::StoreUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            ApiError::Queue(err) => {
                error!(error = %err, "queue operation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Join(err) => {
                error!(error = %err, "queue task did not complete");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run a queue operation on the blocking pool.
async fn with_queue<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&LeaseQueue) -> leaseq_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let queue = Arc::clone(&state.queue);
    Ok(tokio::task::spawn_blocking(move || op(&queue)).await??)
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ack {
    pub status: String,
}

impl Ack {
    fn ok() -> Json<Self> {
        Json(Self {
            status: "ok".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct EnqueueForm {
    pub data: Option<String>,
    pub priority: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DequeueQuery {
    pub timeout: Option<String>,
}

/// `key` is `""` when the task was handed out without a lease.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DequeueResponse {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeekResponse {
    pub value: String,
}

async fn enqueue(State(state): State<AppState>, Form(form): Form<EnqueueForm>) -> ApiResult<Ack> {
    let data = form
        .data
        .filter(|data| !data.trim().is_empty())
        .ok_or(ApiError::BadRequest("data is required"))?;

    match form.priority.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(raw) => {
            let priority = raw
                .parse::<u8>()
                .map_err(|_| ApiError::BadRequest("priority must be an integer in 0..=255"))?;
            with_queue(&state, move |queue| queue.enqueue_with_priority(data, priority)).await?;
        }
        None => {
            with_queue(&state, move |queue| queue.enqueue(data)).await?;
        }
    }
    Ok(Ack::ok())
}

async fn dequeue(
    State(state): State<AppState>,
    Query(query): Query<DequeueQuery>,
) -> ApiResult<DequeueResponse> {
    let timeout = query
        .timeout
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .ok_or(ApiError::BadRequest("timeout must be an integer number of seconds"))?;

    let delivery = with_queue(&state, move |queue| queue.dequeue(timeout)).await?;
    Ok(Json(DequeueResponse {
        key: delivery
            .lease_key
            .map(|key| key.into_string())
            .unwrap_or_default(),
        value: String::from_utf8_lossy(&delivery.value).into_owned(),
    }))
}

async fn confirm(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<Ack> {
    let key = key.trim().to_string();
    if key.is_empty() {
        return Err(ApiError::BadRequest("key is required"));
    }
    with_queue(&state, move |queue| queue.confirm(&key)).await?;
    Ok(Ack::ok())
}

async fn confirm_without_key() -> ApiError {
    ApiError::BadRequest("key is required")
}

async fn status(State(state): State<AppState>) -> ApiResult<QueueStatus> {
    let status = with_queue(&state, |queue| Ok(queue.status())).await?;
    Ok(Json(status))
}

async fn peek(State(state): State<AppState>) -> ApiResult<PeekResponse> {
    let value = with_queue(&state, |queue| queue.peek()).await?;
    Ok(Json(PeekResponse {
        value: String::from_utf8_lossy(&value).into_owned(),
    }))
}
