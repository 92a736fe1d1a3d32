use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use nyaya_core::{ResearchMode, ResearchRequest, ResponseStreamer};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

pub const SERVICE_NAME: &str = "Indian Legal Research API";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

// ── AppState ──────────────────────────────────────────────────────────────

pub struct AppState {
    pub streamer: ResponseStreamer,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/research", post(research))
        .route("/research/stream", post(research_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────────────

/// Request rejected before any research starts; rendered as `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

// ── Request body ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ResearchBody {
    query: String,
    #[serde(default)]
    mode: ResearchMode,
}

fn accept(body: Result<Json<ResearchBody>, JsonRejection>) -> Result<ResearchRequest, ApiError> {
    let Json(body) = body?;
    let request = ResearchRequest::new(body.query, body.mode).map_err(|e| {
        debug!("rejecting research request: {e}");
        ApiError::bad_request(e.to_string())
    })?;
    info!(mode = %request.mode(), query_len = request.query().len(), "research request accepted");
    Ok(request)
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn root() -> Json<Value> {
    let modes: Map<String, Value> = ResearchMode::ALL
        .iter()
        .map(|m| (m.as_str().to_string(), Value::from(m.description())))
        .collect();
    Json(json!({
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "description": "AI-powered legal research for Indian law",
        "endpoints": {
            "POST /research": "Perform legal research and return final JSON result",
            "POST /research/stream": "Perform legal research with real-time streaming progress (SSE)",
            "GET /health": "Health check",
        },
        "modes": modes,
        "features": [
            "Multi-agent research with specialized subagents",
            "Real-time streaming progress updates",
            "Structured JSON output with citations",
        ],
        "timeout": "5 minutes per request",
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
    }))
}

/// One JSON document, delivered as a single chunk once the run ends.
async fn research(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ResearchBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = accept(body)?;
    let chunks = UnboundedReceiverStream::new(state.streamer.aggregate(request)).map(Ok::<_, Infallible>);
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        Body::from_stream(chunks),
    )
        .into_response())
}

/// Server-sent events, one `data:` frame per progress event.
async fn research_stream(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ResearchBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = accept(body)?;
    let events = UnboundedReceiverStream::new(state.streamer.live(request))
        .map(|json| Ok::<_, Infallible>(Event::default().data(json)));
    let sse = Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    );
    Ok((
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (header::CONNECTION, HeaderValue::from_static("keep-alive")),
            (HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
        ],
        sse,
    )
        .into_response())
}
