//! JSON HTTP API over the orchestrator.
//!
//! # Endpoints
//!
//! | Method   | Path                                      | Description                       |
//! |----------|-------------------------------------------|-----------------------------------|
//! | `POST`   | `/api/v1/analyze`                         | Analyze one issue                 |
//! | `POST`   | `/api/v1/analyze-batch`                   | Analyze up to 5 issues            |
//! | `GET`    | `/api/v1/health`                          | Health check                      |
//! | `GET`    | `/api/v1/stats`                           | Cache and request statistics      |
//! | `DELETE` | `/api/v1/cache`                           | Clear every cached analysis       |
//! | `DELETE` | `/api/v1/cache/{owner}/{repo}`            | Clear one repository's analyses   |
//! | `DELETE` | `/api/v1/cache/{owner}/{repo}/{number}`   | Clear one issue's analyses        |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "rate_limited", "message": "Rate limit exceeded, retry after 30s" } }
//! ```
//!
//! Rate-limited responses also carry a `Retry-After` header when the upstream supplied a hint.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::ClearScope;
use crate::config::ServerConfig;
use crate::error::{LensError, Result};
use crate::model::{AnalysisResult, IssueRef, IssueState};
use crate::orchestrator::{Analysis, AnalyzeOptions, MAX_BATCH, Orchestrator, StatsSnapshot};

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Build the API router.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let api = Router::new()
        .route("/analyze", post(handle_analyze))
        .route("/analyze-batch", post(handle_analyze_batch))
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/cache", delete(handle_clear_all))
        .route("/cache/{owner}/{repo}", delete(handle_clear_repository))
        .route("/cache/{owner}/{repo}/{number}", delete(handle_clear_issue));

    Router::new()
        .nest("/api/v1", api)
        .with_state(AppState { orchestrator })
}

/// Serve the API on `[server].bind` until `shutdown` resolves.
pub async fn run_server(
    config: &ServerConfig,
    orchestrator: Arc<Orchestrator>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .map_err(|e| LensError::Config(format!("failed to bind {}: {}", config.bind, e)))?;
    info!(bind = %config.bind, "listening");

    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| LensError::Server(e.to_string()))
}

// ============ Error response ============

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// A `LensError` rendered as an HTTP response.
#[derive(Debug)]
struct AppError(LensError);

impl From<LensError> for AppError {
    fn from(err: LensError) -> Self {
        AppError(err)
    }
}

/// HTTP status for each error kind.
fn status_for(err: &LensError) -> StatusCode {
    match err {
        LensError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        LensError::NotFound(_) => StatusCode::NOT_FOUND,
        // The service's own upstream credential was rejected, not the caller's.
        LensError::Unauthorized => StatusCode::BAD_GATEWAY,
        LensError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        LensError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LensError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
        LensError::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LensError::Config(_) | LensError::MissingCredential(_) | LensError::Server(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn detail(err: &LensError) -> ErrorDetail {
    ErrorDetail {
        code: err.kind(),
        message: err.to_string(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let mut response = (
            status,
            Json(ErrorBody {
                error: detail(&self.0),
            }),
        )
            .into_response();

        if let Some(wait) = self.0.retry_after() {
            // Round up so clients never retry early.
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

// ============ POST /analyze ============

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    github_url: String,
    issue_number: u64,
    #[serde(default = "default_use_cache")]
    use_cache: bool,
}

fn default_use_cache() -> bool {
    true
}

impl AnalyzeRequest {
    fn issue(&self) -> Result<IssueRef> {
        IssueRef::parse_repo_url(&self.github_url, self.issue_number)
    }

    fn options(&self) -> AnalyzeOptions {
        AnalyzeOptions {
            bypass_cache: !self.use_cache,
        }
    }
}

#[derive(Debug, Serialize)]
struct Metadata {
    analysis_time_ms: u64,
    cached: bool,
    issue_url: String,
    author: Option<String>,
    state: IssueState,
    existing_labels: Vec<String>,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetail>,
}

impl From<Analysis> for AnalyzeResponse {
    fn from(analysis: Analysis) -> Self {
        AnalyzeResponse {
            success: true,
            metadata: Some(Metadata {
                analysis_time_ms: analysis.elapsed_ms,
                cached: analysis.cached,
                issue_url: analysis.html_url,
                author: analysis.author,
                state: analysis.state,
                existing_labels: analysis.labels,
            }),
            data: Some(analysis.result),
            error: None,
        }
    }
}

impl From<Result<Analysis>> for AnalyzeResponse {
    fn from(outcome: Result<Analysis>) -> Self {
        match outcome {
            Ok(analysis) => analysis.into(),
            Err(err) => AnalyzeResponse {
                success: false,
                data: None,
                metadata: None,
                error: Some(detail(&err)),
            },
        }
    }
}

async fn handle_analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> std::result::Result<Json<AnalyzeResponse>, AppError> {
    let issue = request.issue()?;
    let analysis = state
        .orchestrator
        .analyze(&issue, request.options())
        .await?;
    Ok(Json(analysis.into()))
}

// ============ POST /analyze-batch ============

#[derive(Debug, Serialize)]
struct BatchResponse {
    analyses: Vec<AnalyzeResponse>,
    total: usize,
}

/// Items that fail validation or analysis are reported in place; the batch itself succeeds.
async fn handle_analyze_batch(
    State(state): State<AppState>,
    Json(items): Json<Vec<AnalyzeRequest>>,
) -> std::result::Result<Json<BatchResponse>, AppError> {
    let total = items.len();
    if total > MAX_BATCH {
        return Err(
            LensError::InvalidInput(format!("maximum {} issues per batch", MAX_BATCH)).into(),
        );
    }

    let mut outcomes: Vec<Option<Result<Analysis>>> = Vec::with_capacity(total);
    let mut requests = Vec::new();
    let mut positions = Vec::new();

    for (position, item) in items.iter().enumerate() {
        match item.issue() {
            Ok(issue) => {
                requests.push((issue, item.options()));
                positions.push(position);
                outcomes.push(None);
            }
            Err(err) => outcomes.push(Some(Err(err))),
        }
    }
    let results = state.orchestrator.analyze_batch(requests).await?;
    for (position, result) in positions.into_iter().zip(results) {
        outcomes[position] = Some(result);
    }

    Ok(Json(BatchResponse {
        analyses: outcomes.into_iter().flatten().map(Into::into).collect(),
        total,
    }))
}

// ============ GET /health, GET /stats ============

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: DateTime<Utc>,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

async fn handle_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.orchestrator.stats().await)
}

// ============ DELETE /cache ============

#[derive(Debug, Serialize)]
struct ClearResponse {
    success: bool,
    removed: usize,
    message: String,
}

async fn clear(state: &AppState, scope: ClearScope, label: String) -> Result<Json<ClearResponse>> {
    let removed = state.orchestrator.clear_cache(&scope).await?;
    Ok(Json(ClearResponse {
        success: true,
        removed,
        message: format!("Cache cleared for {}", label),
    }))
}

async fn handle_clear_all(
    State(state): State<AppState>,
) -> std::result::Result<Json<ClearResponse>, AppError> {
    Ok(clear(&state, ClearScope::All, "all issues".into()).await?)
}

async fn handle_clear_repository(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> std::result::Result<Json<ClearResponse>, AppError> {
    let label = format!("{}/{}", owner, repo);
    let scope = ClearScope::Repository { owner, name: repo };
    Ok(clear(&state, scope, label).await?)
}

async fn handle_clear_issue(
    State(state): State<AppState>,
    Path((owner, repo, number)): Path<(String, String, u64)>,
) -> std::result::Result<Json<ClearResponse>, AppError> {
    let issue = IssueRef::new(owner, repo, number)?;
    let label = issue.to_string();
    Ok(clear(&state, ClearScope::Issue(issue), label).await?)
}
