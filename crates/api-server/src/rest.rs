//! REST API handlers for sequences, enrollments, executions and operational endpoints.

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use outreach_core::types::Lead;
use outreach_core::OutreachError;
use outreach_sequences::types::{
    Enrollment, Execution, ExecutionOutcome, InboundEvent, Sequence, SequenceDefinition,
    SequenceSettings, SequenceStatus, Step, StepDefinition,
};
use outreach_sequences::{SequenceAnalytics, SequenceEngine};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: SequenceEngine,
    pub node_id: String,
    pub start_time: Instant,
}

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// Maps an engine error to its HTTP status and JSON body.
fn api_error(e: OutreachError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        OutreachError::NotFound { .. } => StatusCode::NOT_FOUND,
        OutreachError::InvalidState(_) => StatusCode::CONFLICT,
        OutreachError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %e, "Request failed");
    } else {
        warn!(error = %e, code = e.code(), "Request rejected");
    }
    metrics::counter!("api.errors", "code" => e.code()).increment(1);
    (
        status,
        Json(ErrorResponse {
            error: e.code().to_string(),
            message: e.to_string(),
        }),
    )
}

// ─── Sequences ─────────────────────────────────────────────────────────────

/// GET /v1/sequences
pub async fn list_sequences(State(state): State<AppState>) -> Json<Vec<Sequence>> {
    Json(state.engine.list_sequences())
}

/// POST /v1/sequences
pub async fn create_sequence(
    State(state): State<AppState>,
    Json(definition): Json<SequenceDefinition>,
) -> ApiResult<Sequence> {
    state
        .engine
        .create_sequence(definition)
        .map(Json)
        .map_err(api_error)
}

/// GET /v1/sequences/:id
pub async fn get_sequence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Sequence> {
    state.engine.get_sequence(id).map(Json).map_err(api_error)
}

/// DELETE /v1/sequences/:id — cascade-pauses the sequence's active enrollments.
pub async fn delete_sequence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Sequence> {
    state.engine.delete_sequence(id).map(Json).map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: SequenceStatus,
}

/// PUT /v1/sequences/:id/status
pub async fn set_sequence_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Sequence> {
    state
        .engine
        .set_sequence_status(id, request.status)
        .map(Json)
        .map_err(api_error)
}

/// PUT /v1/sequences/:id/settings
pub async fn update_settings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(settings): Json<SequenceSettings>,
) -> ApiResult<Sequence> {
    state
        .engine
        .update_settings(id, settings)
        .map(Json)
        .map_err(api_error)
}

/// POST /v1/sequences/:id/steps
pub async fn add_step(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(definition): Json<StepDefinition>,
) -> ApiResult<Step> {
    state
        .engine
        .add_step(id, definition)
        .map(Json)
        .map_err(api_error)
}

/// PUT /v1/sequences/:id/steps/:step_id
pub async fn update_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(Uuid, Uuid)>,
    Json(definition): Json<StepDefinition>,
) -> ApiResult<Sequence> {
    state
        .engine
        .update_step(id, step_id, definition)
        .map(Json)
        .map_err(api_error)
}

/// DELETE /v1/sequences/:id/steps/:step_id
pub async fn remove_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Sequence> {
    state
        .engine
        .remove_step(id, step_id)
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub step_ids: Vec<Uuid>,
}

/// PUT /v1/sequences/:id/step-order
pub async fn reorder_steps(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReorderRequest>,
) -> ApiResult<Sequence> {
    state
        .engine
        .reorder_steps(id, &request.step_ids)
        .map(Json)
        .map_err(api_error)
}

/// GET /v1/sequences/:id/analytics
pub async fn sequence_analytics(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SequenceAnalytics> {
    state
        .engine
        .sequence_analytics(id)
        .map(Json)
        .map_err(api_error)
}

// ─── Enrollments ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub lead: Lead,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

/// POST /v1/sequences/:id/enrollments
pub async fn enroll_lead(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<EnrollRequest>,
) -> ApiResult<Enrollment> {
    state
        .engine
        .enroll_lead(id, request.lead, request.variables)
        .map(Json)
        .map_err(api_error)
}

/// GET /v1/sequences/:id/enrollments
pub async fn list_enrollments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<Vec<Enrollment>> {
    Json(state.engine.list_enrollments(id))
}

/// GET /v1/enrollments/:id
pub async fn get_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Enrollment> {
    state.engine.get_enrollment(id).map(Json).map_err(api_error)
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseRequest {
    #[serde(default)]
    pub detail: Option<String>,
}

/// POST /v1/enrollments/:id/reply
pub async fn handle_reply(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResponseRequest>,
) -> ApiResult<Enrollment> {
    state
        .engine
        .handle_reply(id, request.detail)
        .map(Json)
        .map_err(api_error)
}

/// POST /v1/enrollments/:id/meeting
pub async fn handle_meeting_booked(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResponseRequest>,
) -> ApiResult<Enrollment> {
    state
        .engine
        .handle_meeting_booked(id, request.detail)
        .map(Json)
        .map_err(api_error)
}

/// POST /v1/enrollments/:id/pause
pub async fn pause_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Enrollment> {
    state.engine.pause_enrollment(id).map(Json).map_err(api_error)
}

/// POST /v1/enrollments/:id/resume
pub async fn resume_enrollment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Enrollment> {
    state.engine.resume_enrollment(id).map(Json).map_err(api_error)
}

/// GET /v1/enrollments/:id/executions
pub async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<Vec<Execution>> {
    Json(state.engine.list_executions(id))
}

// ─── Executions & inbound events ───────────────────────────────────────────

/// GET /v1/executions/:id
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Execution> {
    state.engine.get_execution(id).map(Json).map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub outcome: ExecutionOutcome,
    #[serde(default)]
    pub detail: Option<String>,
}

/// POST /v1/executions/:id/complete — dispatcher outcome callback.
pub async fn complete_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CompleteRequest>,
) -> ApiResult<Execution> {
    state
        .engine
        .complete_execution(id, request.outcome, request.detail)
        .map(Json)
        .map_err(api_error)
}

/// POST /v1/events — inbound provider notification (reply, meeting, open, click, bounce).
pub async fn handle_event(
    State(state): State<AppState>,
    Json(event): Json<InboundEvent>,
) -> ApiResult<Enrollment> {
    metrics::counter!("api.inbound_events").increment(1);
    state.engine.handle_event(event).map(Json).map_err(api_error)
}

// ─── Operational ───────────────────────────────────────────────────────────

/// GET /health — Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        sequences: state.engine.list_sequences().len(),
    })
}

/// GET /ready — Readiness probe for Kubernetes.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live — Liveness probe for Kubernetes.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub sequences: usize,
}
