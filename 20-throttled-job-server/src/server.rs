//! HTTP boundary translating requests into repository and pool calls.
//!
//! Every request passes the shared [`TokenBucket`] first; a rejected request
//! gets `429` and touches nothing else.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::job::WriteItemJob;
use crate::pool::WorkerPool;
use crate::ratelimit::TokenBucket;
use crate::repo::{Item, RepoError, Repository};

#[derive(Clone)]
pub struct AppState {
    repo: Arc<dyn Repository>,
    pool: Arc<WorkerPool>,
    bucket: Arc<TokenBucket>,
    job_delay: Duration,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn Repository>,
        pool: Arc<WorkerPool>,
        bucket: Arc<TokenBucket>,
        job_delay: Duration,
    ) -> Self {
        Self {
            repo,
            pool,
            bucket,
            job_delay,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelled when the server starts shutting down. Writes issued
    /// after that point fail with [`RepoError::Cancelled`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("key must not be empty")]
    EmptyKey,

    #[error("queue full")]
    QueueFull,

    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::EmptyKey => StatusCode::BAD_REQUEST,
            ApiError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Repo(RepoError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Repo(RepoError::Cancelled) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct NewItem {
    key: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct WorkRequest {
    #[serde(default)]
    payload: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusBody {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl StatusBody {
    fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
            key: None,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/items", get(list_items).post(create_item))
        .route("/items/:key", get(get_item).delete(delete_item))
        .route("/work", post(submit_work))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `state` on `listener` until `shutdown` resolves.
///
/// Once `shutdown` fires, the state's shutdown token is cancelled and
/// in-progress requests are allowed to finish.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = state.shutdown_token();
    let app = router(state);
    info!(addr = ?listener.local_addr().ok(), "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            token.cancel();
        })
        .await
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.bucket.allow() {
        debug!(path = %request.uri().path(), "request rate limited");
        return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    }
    next.run(request).await
}

async fn health() -> &'static str {
    "ok"
}

async fn list_items(State(state): State<AppState>) -> Json<Vec<Item>> {
    Json(state.repo.list())
}

async fn create_item(
    State(state): State<AppState>,
    Json(input): Json<NewItem>,
) -> Result<(StatusCode, Json<StatusBody>), ApiError> {
    if input.key.is_empty() {
        return Err(ApiError::EmptyKey);
    }
    state
        .repo
        .put(&state.shutdown, Item::new(input.key, input.value))?;
    Ok((StatusCode::CREATED, Json(StatusBody::new("stored"))))
}

async fn get_item(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Item>, ApiError> {
    Ok(Json(state.repo.get(&key)?))
}

async fn delete_item(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.repo.delete(&key)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_work(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<StatusBody>), ApiError> {
    // A missing or malformed body still enqueues work, just with an empty payload.
    let input: WorkRequest = serde_json::from_slice(&body).unwrap_or_default();
    let key = nanoid::nanoid!();
    let job = WriteItemJob::new(
        Arc::clone(&state.repo),
        Item::new(key.clone(), input.payload),
        state.job_delay,
    );

    if !state.pool.submit(job) {
        return Err(ApiError::QueueFull);
    }
    debug!(%key, "work enqueued");
    Ok((
        StatusCode::ACCEPTED,
        Json(StatusBody {
            status: "enqueued".to_string(),
            key: Some(key),
        }),
    ))
}
