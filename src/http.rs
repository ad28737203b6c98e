use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::{MAX_TIMELINE_SLOTS, TOKEN_LEN};
use crate::model::Ms;
use crate::time::{build_utc_range_from_date_and_time, parse_utc_iso};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Prefix for share links in create responses.
    pub base_url: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/plans", post(create_plan))
        .route("/api/plans/{token}/join", post(join_plan))
        .route("/api/plans/{token}/availability", post(submit_availability))
        .route("/api/plans/{token}/state", get(plan_state))
        .route("/api/plans/{token}/finalize", post(finalize_plan))
        .layer(middleware::from_fn(track_requests))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn track_requests(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    // The route template, not the concrete path — keeps label cardinality flat.
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let response = next.run(req).await;

    metrics::histogram!(
        crate::observability::HTTP_REQUEST_DURATION_SECONDS,
        "route" => route.clone(),
        "method" => method.clone(),
    )
    .record(start.elapsed().as_secs_f64());
    metrics::counter!(
        crate::observability::HTTP_REQUESTS_TOTAL,
        "route" => route,
        "method" => method,
        "status" => response.status().as_u16().to_string(),
    )
    .increment(1);

    response
}

// ── Error mapping ────────────────────────────────────────

struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            EngineError::InvalidInput(_) | EngineError::LimitExceeded(_) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            EngineError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            EngineError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            EngineError::Internal(_) | EngineError::WalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = json!({
            "error": { "code": code, "message": self.0.to_string() }
        });
        (status, Json(body)).into_response()
    }
}

fn validate_token(token: &str) -> Result<(), ApiError> {
    if token.len() != TOKEN_LEN || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(EngineError::InvalidInput("malformed plan token".into()).into());
    }
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePlanRequest {
    title: String,
    owner_name: String,
    date_start: String,
    date_end: String,
    time_start: String,
    time_end: String,
    duration_minutes: i64,
}

async fn create_plan(
    State(state): State<AppState>,
    Json(req): Json<CreatePlanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let range = build_utc_range_from_date_and_time(
        &req.date_start,
        &req.date_end,
        &req.time_start,
        &req.time_end,
    )?;
    let created = state
        .engine
        .create_plan(&req.title, &req.owner_name, range, req.duration_minutes)
        .await?;

    let body = json!({
        "token": created.token,
        "shareUrl": format!("{}/p/{}", state.base_url, created.token),
        "ownerKey": created.owner_key,
    });
    Ok((StatusCode::CREATED, Json(body)))
}

#[derive(Deserialize)]
struct JoinRequest {
    name: String,
}

async fn join_plan(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_token(&token)?;
    let outcome = state.engine.join_plan(&token, &req.name).await?;
    Ok(Json(json!({
        "participantId": outcome.participant_id,
        "isOwner": outcome.is_owner,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitAvailabilityRequest {
    participant_id: Ulid,
    timestamps: Vec<String>,
}

async fn submit_availability(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<SubmitAvailabilityRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_token(&token)?;
    // Bound before parsing: a huge array must not cost a parse per element.
    if req.timestamps.len() > MAX_TIMELINE_SLOTS {
        return Err(EngineError::InvalidInput("too many timestamps".into()).into());
    }
    let timestamps: Vec<Ms> = req
        .timestamps
        .iter()
        .map(|s| parse_utc_iso(s))
        .collect::<Result<_, _>>()?;

    let stored = state
        .engine
        .replace_availability(&token, &req.participant_id, &timestamps)
        .await?;
    Ok(Json(json!({ "ok": true, "slotCount": stored })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateQuery {
    viewer_name: Option<String>,
}

async fn plan_state(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<StateQuery>,
) -> Result<Response, ApiError> {
    validate_token(&token)?;
    let viewer = query
        .viewer_name
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let view = state.engine.compute_state(&token, viewer).await?;
    Ok(Json(view).into_response())
}

async fn finalize_plan(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Json<crate::model::FinalizeView>, ApiError> {
    validate_token(&token)?;
    let owner_key = headers
        .get("x-owner-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let view = state.engine.finalize_plan(&token, owner_key).await?;
    Ok(Json(view))
}
