use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::errors::OrchestratorError;
use crate::feedback::{FeedbackLog, Rating};
use crate::orchestrator::{CreateSessionRequest, RefineOutcome, RefinementOrchestrator};
use crate::session::EditTarget;
use crate::templates;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: RefinementOrchestrator,
    pub feedback: FeedbackLog,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateSessionBody {
    pub raw_request: String,
    pub task_type: Option<String>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub template_name: Option<String>,
    pub template_variables: Option<HashMap<String, String>>,
    pub max_recursion_depth: Option<u32>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Deserialize)]
pub struct EditBody {
    pub target: String,
    pub text: String,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct ExplainBody {
    pub term: String,
}

#[derive(Deserialize)]
pub struct FeedbackBody {
    pub rating: String,
    pub comment: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    UpstreamFailure(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::UpstreamFailure(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let msg = err.to_string();
        match err {
            OrchestratorError::SessionNotFound { .. } => ApiError::NotFound(msg),
            OrchestratorError::InvalidStage { .. } => ApiError::Conflict(msg),
            OrchestratorError::MissingPrompt { .. } => ApiError::BadRequest(msg),
            OrchestratorError::Llm { .. } => ApiError::UpstreamFailure(msg),
            OrchestratorError::Configuration(_)
            | OrchestratorError::Store(_)
            | OrchestratorError::Unexpected(_) => ApiError::Internal(msg),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route(
            "/api/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/sessions/{id}/generate", post(generate_first_draft))
        .route("/api/sessions/{id}/evaluate", post(evaluate))
        .route("/api/sessions/{id}/refine", post(refine))
        .route("/api/sessions/{id}/complete", post(complete))
        .route("/api/sessions/{id}/edit", post(apply_edit))
        .route("/api/sessions/{id}/run", post(run_to_completion))
        .route("/api/sessions/{id}/explain", post(explain_term))
        .route("/api/sessions/{id}/feedback", post(record_feedback))
        .route("/api/sessions/sweep", post(sweep_expired))
        .route("/api/templates", get(list_templates))
        .route("/api/providers", get(list_providers))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_session(
    State(state): State<SharedState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .orchestrator
        .create_session(CreateSessionRequest {
            raw_request: body.raw_request,
            task_type: body.task_type,
            model_override: body.model,
            provider_override: body.provider,
            template_name: body.template_name,
            template_variables: body.template_variables,
            max_recursion_depth: body.max_recursion_depth,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn list_sessions(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let summaries = state
        .orchestrator
        .list_sessions(query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(summaries))
}

async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.orchestrator.get_session(&id).await?;
    Ok(Json(session))
}

async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.orchestrator.delete_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn generate_first_draft(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.orchestrator.generate_first_draft(&id).await?;
    Ok(Json(session))
}

async fn evaluate(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.orchestrator.evaluate(&id).await?;
    Ok(Json(session))
}

async fn refine(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.orchestrator.refine(&id).await?;
    let label = match &outcome {
        RefineOutcome::Refined(_) => "refined",
        RefineOutcome::Converged(_) => "converged",
        RefineOutcome::MaxDepthReached(_) => "max_depth_reached",
    };
    Ok(Json(serde_json::json!({
        "outcome": label,
        "session": outcome.into_session(),
    })))
}

async fn complete(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.orchestrator.complete(&id).await?;
    Ok(Json(session))
}

async fn apply_edit(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<EditBody>,
) -> Result<impl IntoResponse, ApiError> {
    let target = EditTarget::from_str(&body.target).map_err(ApiError::BadRequest)?;
    let session = state
        .orchestrator
        .apply_user_edit(&id, target, &body.text, body.comment)
        .await?;
    Ok(Json(session))
}

async fn run_to_completion(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.orchestrator.run_to_completion(&id).await?;
    Ok(Json(session))
}

async fn explain_term(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<ExplainBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.term.trim().is_empty() {
        return Err(ApiError::BadRequest("'term' must not be empty".into()));
    }
    let explanation = state
        .orchestrator
        .explain_term(&id, body.term.trim())
        .await?;
    Ok(Json(serde_json::json!({
        "term": body.term.trim(),
        "explanation": explanation,
    })))
}

async fn record_feedback(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<FeedbackBody>,
) -> Result<impl IntoResponse, ApiError> {
    // Feedback only attaches to sessions that exist
    state.orchestrator.get_session(&id).await?;
    let rating = match body.rating.to_lowercase().as_str() {
        "positive" | "up" => Rating::Positive,
        "negative" | "down" => Rating::Negative,
        other => {
            return Err(ApiError::BadRequest(format!(
                "Invalid rating '{}' (expected positive or negative)",
                other
            )));
        }
    };
    let entry = state
        .feedback
        .record(&id, rating, body.comment)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn sweep_expired(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state.orchestrator.sweep_expired().await?;
    Ok(Json(serde_json::json!({"removed": removed})))
}

async fn list_templates() -> impl IntoResponse {
    Json(templates::structured_template_names())
}

async fn list_providers(State(state): State<SharedState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "active": state.orchestrator.config().active_provider,
        "registered": state.orchestrator.providers(),
    }))
}
