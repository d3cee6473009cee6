/// Active-run and sub-workflow routes

use crate::api::{ApiError, ApiResult, AppState};
use crate::registry::types::{CallerSource, ProgressUpdate, RegisterRun, RunEntry, RunStatus};
use crate::workflow::subworkflow::SubWorkflowExecution;
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Create the run registry and sub-workflow routes
pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/runs", post(register_run))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/cleanup", post(cleanup_runs))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/progress", post(update_progress))
        .route("/api/runs/{id}/jump", post(jump_to_node))
        .route("/api/runs/{id}/pause", post(pause_run))
        .route("/api/runs/{id}/resume", post(resume_run))
        .route("/api/runs/{id}/complete", post(complete_run))
        .route("/api/runs/{id}/fail", post(fail_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/api/subworkflows", post(start_sub_workflow))
        .route("/api/subworkflows", get(list_sub_workflows))
        .route("/api/subworkflows/{id}", get(get_sub_workflow))
        .route("/api/subworkflows/{id}/complete", post(complete_sub_workflow))
}

/// POST /api/runs — register an instance that began executing a definition
async fn register_run(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRun>,
) -> ApiResult<RunEntry> {
    Ok(Json(state.registry.register(payload).await?))
}

#[derive(Debug, Deserialize)]
struct ListRunsQuery {
    status: Option<String>,
    source: Option<String>,
}

/// GET /api/runs?status=running&source=agent-runtime
async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> ApiResult<Vec<RunEntry>> {
    let status = query.status.as_deref().map(RunStatus::parse).transpose()?;
    let source = query
        .source
        .as_deref()
        .map(CallerSource::parse)
        .transpose()?;
    Ok(Json(state.registry.list_runs(status, source).await?))
}

/// GET /api/runs/{id}
async fn get_run(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<RunEntry> {
    Ok(Json(state.registry.get_run(&id).await?))
}

/// POST /api/runs/{id}/progress
async fn update_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<ProgressUpdate>,
) -> ApiResult<RunEntry> {
    Ok(Json(state.registry.update_progress(&id, update).await?))
}

#[derive(Debug, Deserialize)]
struct JumpRequest {
    node_id: String,
    node_name: Option<String>,
}

/// POST /api/runs/{id}/jump — move position without executing anything
async fn jump_to_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<JumpRequest>,
) -> ApiResult<RunEntry> {
    Ok(Json(
        state
            .registry
            .jump_to_node(&id, &payload.node_id, payload.node_name)
            .await?,
    ))
}

/// POST /api/runs/{id}/pause
async fn pause_run(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<RunEntry> {
    Ok(Json(state.registry.pause(&id).await?))
}

/// POST /api/runs/{id}/resume
async fn resume_run(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<RunEntry> {
    Ok(Json(state.registry.resume(&id).await?))
}

#[derive(Debug, Default, Deserialize)]
struct CompleteRequest {
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

/// POST /api/runs/{id}/complete
async fn complete_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<CompleteRequest>>,
) -> ApiResult<RunEntry> {
    let metadata = payload.and_then(|Json(p)| p.metadata);
    Ok(Json(state.registry.complete(&id, metadata).await?))
}

#[derive(Debug, Deserialize)]
struct FailRequest {
    error_message: String,
    #[serde(default)]
    error_details: Option<Value>,
}

/// POST /api/runs/{id}/fail
async fn fail_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<FailRequest>,
) -> ApiResult<RunEntry> {
    Ok(Json(
        state
            .registry
            .fail(&id, &payload.error_message, payload.error_details)
            .await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
struct CancelRequest {
    #[serde(default)]
    reason: Option<String>,
}

/// POST /api/runs/{id}/cancel
async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<CancelRequest>>,
) -> ApiResult<RunEntry> {
    let reason = payload.and_then(|Json(p)| p.reason);
    Ok(Json(state.registry.cancel(&id, reason).await?))
}

#[derive(Debug, Default, Deserialize)]
struct CleanupRequest {
    #[serde(default)]
    older_than_days: Option<i64>,
}

/// POST /api/runs/cleanup — delete terminal runs older than the cutoff
async fn cleanup_runs(
    State(state): State<AppState>,
    payload: Option<Json<CleanupRequest>>,
) -> Result<Json<Value>, ApiError> {
    let days = payload
        .and_then(|Json(p)| p.older_than_days)
        .unwrap_or(30);
    let deleted = state.registry.cleanup_old_runs(days).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
struct StartSubWorkflowRequest {
    parent_instance_id: i64,
    parent_phase_number: i64,
    child_def_id: String,
    child_version: String,
}

/// POST /api/subworkflows
async fn start_sub_workflow(
    State(state): State<AppState>,
    Json(payload): Json<StartSubWorkflowRequest>,
) -> ApiResult<SubWorkflowExecution> {
    Ok(Json(
        state
            .subworkflows
            .start(
                payload.parent_instance_id,
                payload.parent_phase_number,
                &payload.child_def_id,
                &payload.child_version,
            )
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct ListSubWorkflowsQuery {
    parent_instance_id: i64,
    parent_phase_number: Option<i64>,
}

/// GET /api/subworkflows?parent_instance_id=5&parent_phase_number=2
///
/// Most recently started first; the head is "the current execution".
async fn list_sub_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListSubWorkflowsQuery>,
) -> ApiResult<Vec<SubWorkflowExecution>> {
    Ok(Json(
        state
            .subworkflows
            .latest_for_parent(query.parent_instance_id, query.parent_phase_number)
            .await?,
    ))
}

/// GET /api/subworkflows/{id}
async fn get_sub_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SubWorkflowExecution> {
    Ok(Json(state.subworkflows.get(&id).await?))
}

#[derive(Debug, Default, Deserialize)]
struct CompleteSubWorkflowRequest {
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// POST /api/subworkflows/{id}/complete — `complete` without an error,
/// `failed` with one
async fn complete_sub_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<CompleteSubWorkflowRequest>>,
) -> ApiResult<SubWorkflowExecution> {
    let (output, error) = payload
        .map(|Json(p)| (p.output, p.error))
        .unwrap_or((None, None));
    Ok(Json(state.subworkflows.complete(&id, output, error).await?))
}
