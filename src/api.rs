use crate::auth::{AuthenticatedUser, UserDirectory};
use crate::claim::claim_next;
use crate::errors::{DaemonError, Result};
use crate::job::{JobId, JobRecord, PrintJob};
use crate::status::{JobStatus, QueueStats};
use crate::store::JobStore;
use crate::submission::{submit_print, PrintSource, SubmitRequest};
use axum::{
    extract::{DefaultBodyLimit, Json, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// HTTP API server state
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn JobStore>,
    pub users: Arc<UserDirectory>,
    /// Upload cap in kB
    pub size_limit_kb: u64,
    /// Server start time for uptime calculation
    pub start_time: std::time::Instant,
}

/// Print submission payload
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmitPrintRequest {
    pub filename: String,
    #[serde(default)]
    pub language: Option<String>,
    /// File contents, base64
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmitPrintResponse {
    pub id: JobId,
    pub message: String,
}

/// One row of the operator job list
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PrintSummary {
    pub id: JobId,
    pub time: f64,
    pub filename: String,
    pub lang: String,
    pub team: String,
    pub room: Option<String>,
    pub status: JobStatus,
}

impl From<&PrintJob> for PrintSummary {
    fn from(job: &PrintJob) -> Self {
        Self {
            id: job.id,
            time: job.submitted_at,
            filename: job.filename.clone(),
            lang: job.language.clone(),
            team: job.requester.clone(),
            room: job.room.clone(),
            status: job.status(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PurgeResponse {
    pub deleted: u64,
}

/// Health check response
#[derive(Debug, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub queue: QueueStats,
}

/// Error response
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let error_string = self.to_string();
        let (status, message) = match self {
            DaemonError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg),
            DaemonError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            DaemonError::JobNotFound(id) => (StatusCode::NOT_FOUND, format!("Printing {} not found", id)),
            DaemonError::Submission(msg) => (StatusCode::BAD_REQUEST, msg),
            other => {
                error!("Request failed: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            details: Some(error_string),
        });

        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"printd\""),
            );
        }
        response
    }
}

fn authenticate(state: &ApiState, headers: &HeaderMap) -> Result<AuthenticatedUser> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());
    state.users.authenticate(auth_header)
}

/// Authenticate and require the operator role.
fn authenticate_operator(state: &ApiState, headers: &HeaderMap) -> Result<AuthenticatedUser> {
    let user = authenticate(state, headers)?;
    user.require_operator()?;
    Ok(user)
}

async fn summary_of(state: &ApiState, id: JobId) -> Result<PrintJob> {
    state
        .store
        .fetch_full(id)
        .await?
        .map(PrintJob::into_summary)
        .ok_or(DaemonError::JobNotFound(id))
}

/// POST /api/printing/next-printing - Claim the oldest unclaimed job
///
/// Answers `null` when there is nothing to print.
async fn handle_next_printing(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Option<JobRecord>>> {
    let user = authenticate_operator(&state, &headers)?;

    let job = claim_next(state.store.as_ref()).await?;
    if let Some(job) = &job {
        info!("Print job {} claimed by {}", job.id, user.username);
    }

    Ok(Json(job.as_ref().map(JobRecord::from)))
}

/// POST /api/printing/set-done/:id - Acknowledge a printed job
async fn handle_set_done(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<JobId>,
) -> Result<Json<JobRecord>> {
    authenticate_operator(&state, &headers)?;

    if !state.store.mark_done(id).await? {
        return Err(DaemonError::JobNotFound(id));
    }
    let job = summary_of(&state, id).await?;
    Ok(Json(JobRecord::from(&job)))
}

/// POST /api/prints - Submit a file for printing
async fn handle_submit(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<SubmitPrintRequest>,
) -> Result<Json<SubmitPrintResponse>> {
    let user = authenticate(&state, &headers)?;
    let source = PrintSource::from_base64(&request.filename, &request.content)?;

    let submitted = submit_print(
        state.store.as_ref(),
        SubmitRequest {
            filename: request.filename,
            language: request.language.unwrap_or_default(),
            requester: user.requester,
            source,
            submitted_at: None,
        },
        state.size_limit_kb,
    )
    .await?;

    Ok(Json(SubmitPrintResponse {
        id: submitted.job.id,
        message: submitted.message,
    }))
}

/// GET /api/prints - All jobs, newest first
async fn handle_list(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PrintSummary>>> {
    authenticate_operator(&state, &headers)?;
    let jobs = state.store.list_all().await?;
    Ok(Json(jobs.iter().map(PrintSummary::from).collect()))
}

/// GET /api/prints/:id/download - Raw file contents
async fn handle_download(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<JobId>,
) -> Result<Response> {
    authenticate_operator(&state, &headers)?;

    let job = state
        .store
        .fetch_full(id)
        .await?
        .ok_or(DaemonError::JobNotFound(id))?;

    let disposition = format!("attachment; filename=\"{}\"", job.filename);
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        job.payload.unwrap_or_default(),
    )
        .into_response())
}

/// POST /api/prints/:id/done - Mark a job done by hand
async fn handle_mark_done(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<JobId>,
) -> Result<Json<PrintSummary>> {
    let user = authenticate_operator(&state, &headers)?;

    if !state.store.mark_done(id).await? {
        return Err(DaemonError::JobNotFound(id));
    }
    info!("Print job {} marked done by {}", id, user.username);
    Ok(Json(PrintSummary::from(&summary_of(&state, id).await?)))
}

/// POST /api/prints/:id/undone - Put a job back in the queue
async fn handle_mark_undone(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<JobId>,
) -> Result<Json<PrintSummary>> {
    let user = authenticate_operator(&state, &headers)?;

    if !state.store.mark_undone(id).await? {
        return Err(DaemonError::JobNotFound(id));
    }
    info!("Print job {} requeued by {}", id, user.username);
    Ok(Json(PrintSummary::from(&summary_of(&state, id).await?)))
}

/// DELETE /api/prints/done - Purge completed jobs (admin only)
async fn handle_purge_done(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<PurgeResponse>> {
    let user = authenticate(&state, &headers)?;
    user.require_admin()?;

    let deleted = state.store.delete_all_done().await?;
    Ok(Json(PurgeResponse { deleted }))
}

/// GET /api/health - Health check endpoint (no auth)
async fn handle_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>> {
    let queue = state.store.stats().await?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        queue,
    }))
}

/// Create HTTP API router
pub fn create_router(state: ApiState) -> Router {
    // Room for base64 overhead on top of the upload cap
    let body_limit = (state.size_limit_kb as usize * 1024) / 3 * 4 + 64 * 1024;

    Router::new()
        .route("/api/printing/next-printing", post(handle_next_printing))
        .route("/api/printing/set-done/:id", post(handle_set_done))
        .route("/api/prints", post(handle_submit).get(handle_list))
        .route("/api/prints/done", delete(handle_purge_done))
        .route("/api/prints/:id/download", get(handle_download))
        .route("/api/prints/:id/done", post(handle_mark_done))
        .route("/api/prints/:id/undone", post(handle_mark_undone))
        .route("/api/health", get(handle_health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

/// Start HTTP API server, stopping gracefully when `cancel` fires.
pub async fn start_api_server(addr: &str, state: ApiState, cancel: CancellationToken) -> Result<()> {
    let router = create_router(state);

    info!("Starting print server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| {
            error!("Print server error: {}", e);
            DaemonError::Io(e)
        })?;

    info!("Print server stopped");
    Ok(())
}
