//! HTTP API over the relay.
//!
//! Form-encoded `/ask` and `/clear-history`, a JSON `/brainstorm`, a
//! history query and a small health endpoint. Validation failures come back
//! as 400 with a machine-readable `kind`.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::db::HistoryEntry;
use crate::error::RelayError;
use crate::relay::{AskReply, AskRequest, BrainstormRequest, SharedRelay};

/// Build the axum router for the relay API.
pub fn router(relay: SharedRelay) -> Router {
    Router::new()
        .route("/history", get(history))
        .route("/ask", post(ask))
        .route("/clear-history", post(clear_history))
        .route("/brainstorm", post(brainstorm))
        .route("/api/v1/health", get(api_health))
        .layer(CorsLayer::permissive())
        .with_state(relay)
}

/// A [`RelayError`] rendered as an HTTP response.
pub struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_invalid_request() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
struct SessionQuery {
    session_id: Option<String>,
}

#[derive(Serialize)]
struct HistoryResponse {
    history: Vec<HistoryEntry>,
}

#[derive(Serialize)]
struct ClearResponse {
    message: &'static str,
    deleted: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    providers: Vec<String>,
    workers: usize,
    timeout_secs: u64,
    history_enabled: bool,
    uptime_secs: u64,
}

async fn history(
    State(relay): State<SharedRelay>,
    Query(params): Query<SessionQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = relay.history(params.session_id.as_deref().unwrap_or(""))?;
    Ok(Json(HistoryResponse { history }))
}

async fn ask(
    State(relay): State<SharedRelay>,
    Form(req): Form<AskRequest>,
) -> Result<Json<AskReply>, ApiError> {
    let reply = relay.ask(req).await.inspect_err(|e| {
        tracing::debug!(error = %e, "Rejected /ask request");
    })?;
    Ok(Json(reply))
}

async fn clear_history(
    State(relay): State<SharedRelay>,
    Form(params): Form<SessionQuery>,
) -> Result<Json<ClearResponse>, ApiError> {
    let deleted = relay.clear_history(params.session_id.as_deref().unwrap_or(""))?;
    Ok(Json(ClearResponse {
        message: "History cleared successfully",
        deleted,
    }))
}

/// Bodies that are not valid JSON are treated as an empty request.
async fn brainstorm(State(relay): State<SharedRelay>, body: Bytes) -> Json<AskReply> {
    let req = if body.is_empty() {
        BrainstormRequest::default()
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed brainstorm body: {e}");
            BrainstormRequest::default()
        })
    };
    Json(relay.brainstorm(req).await)
}

async fn api_health(State(relay): State<SharedRelay>) -> Json<HealthResponse> {
    Json(HealthResponse {
        providers: relay.providers().all().to_vec(),
        workers: relay.workers(),
        timeout_secs: relay.timeout().as_secs(),
        history_enabled: relay.history_enabled(),
        uptime_secs: relay.uptime().as_secs(),
    })
}
