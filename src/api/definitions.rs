/// Definition, version, lock, and graph-edit routes

use crate::api::{ApiError, ApiResult, AppState};
use crate::workflow::{
    graph::{Edge, EdgeUpdate, Node, NodeUpdate},
    types::{DefinitionSummary, NewDefinition, VersionLock, VersionSnapshot, WorkflowDefinition},
};
use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Create the definition management routes
pub fn create_definition_routes() -> Router<AppState> {
    Router::new()
        .route("/api/definitions", post(import_definition))
        .route("/api/definitions", get(list_definitions))
        .route("/api/definitions/{id}", get(get_definition))
        .route("/api/definitions/{id}", delete(delete_definition))
        .route("/api/definitions/{id}/versions", post(create_version))
        .route("/api/definitions/{id}/versions", get(list_versions))
        .route("/api/definitions/{id}/versions/{version}", get(get_version))
        .route(
            "/api/definitions/{id}/versions/{version}/lock",
            post(lock_version),
        )
        .route(
            "/api/definitions/{id}/versions/{version}/unlock",
            post(unlock_version),
        )
        .route("/api/definitions/{id}/nodes", post(add_node))
        .route("/api/definitions/{id}/nodes/{node_id}", put(update_node))
        .route("/api/definitions/{id}/nodes/{node_id}", delete(delete_node))
        .route("/api/definitions/{id}/edges", post(create_edge))
        .route("/api/definitions/{id}/edges/{edge_id}", put(update_edge))
        .route("/api/definitions/{id}/edges/{edge_id}", delete(delete_edge))
}

/// POST /api/definitions
///
/// Imports a definition as a new row; repeated imports of one id stack rows
/// and the newest becomes current.
async fn import_definition(
    State(state): State<AppState>,
    Json(payload): Json<NewDefinition>,
) -> ApiResult<WorkflowDefinition> {
    let definition = state.store.import_definition(payload).await?;
    state.cache.refresh(&definition.id).await?;
    Ok(Json(definition))
}

#[derive(Debug, Deserialize)]
struct ListDefinitionsQuery {
    /// Comma-separated tag filter (any overlap)
    tags: Option<String>,
    is_system: Option<bool>,
}

/// GET /api/definitions?tags=a,b&is_system=false
async fn list_definitions(
    State(state): State<AppState>,
    Query(query): Query<ListDefinitionsQuery>,
) -> ApiResult<Vec<DefinitionSummary>> {
    let tags: Option<Vec<String>> = query.tags.map(|tags| {
        tags.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    });
    let summaries = state
        .store
        .list_definitions(tags.as_deref(), query.is_system)
        .await?;
    Ok(Json(summaries))
}

#[derive(Debug, Deserialize)]
struct GetDefinitionQuery {
    version: Option<String>,
}

/// GET /api/definitions/{id}?version=1.2.0
async fn get_definition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<GetDefinitionQuery>,
) -> ApiResult<WorkflowDefinition> {
    let definition = state
        .store
        .get_definition(&id, query.version.as_deref())
        .await?;
    Ok(Json(definition))
}

/// DELETE /api/definitions/{id}
async fn delete_definition(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let rows = state.store.delete_definition(&id).await?;
    state.cache.remove(&id);
    Ok(Json(json!({ "deleted_rows": rows })))
}

#[derive(Debug, Deserialize)]
struct CreateVersionRequest {
    version: String,
    /// Full definition payload; when omitted the current document is
    /// snapshotted.
    definition: Option<Value>,
    changelog: Option<String>,
    parent_version: Option<String>,
    created_by: Option<String>,
}

/// POST /api/definitions/{id}/versions
///
/// The deliberate, auditable snapshot step — graph edits never snapshot
/// implicitly.
async fn create_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateVersionRequest>,
) -> ApiResult<VersionSnapshot> {
    let definition = match payload.definition {
        Some(definition) => definition,
        None => {
            let current = state.store.get_definition(&id, None).await?;
            serde_json::to_value(&current).map_err(crate::error::WorkflowError::from)?
        }
    };
    let snapshot = state
        .versions
        .create_version(
            &id,
            &payload.version,
            definition,
            payload.changelog,
            payload.parent_version,
            payload.created_by,
        )
        .await?;
    Ok(Json(snapshot))
}

/// GET /api/definitions/{id}/versions
async fn list_versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<VersionSnapshot>> {
    Ok(Json(state.versions.list_versions(&id).await?))
}

/// GET /api/definitions/{id}/versions/{version}
async fn get_version(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, String)>,
) -> ApiResult<VersionSnapshot> {
    Ok(Json(state.versions.get_version(&id, &version).await?))
}

#[derive(Debug, Deserialize)]
struct LockRequest {
    instance_id: String,
}

/// POST /api/definitions/{id}/versions/{version}/lock
async fn lock_version(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, String)>,
    Json(payload): Json<LockRequest>,
) -> ApiResult<VersionLock> {
    let lock = state
        .versions
        .lock_version(&id, &version, &payload.instance_id)
        .await?;
    Ok(Json(lock))
}

/// POST /api/definitions/{id}/versions/{version}/unlock
async fn unlock_version(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, String)>,
    Json(payload): Json<LockRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .versions
        .unlock_version(&id, &version, &payload.instance_id)
        .await?;
    Ok(Json(json!({ "unlocked": true })))
}

/// POST /api/definitions/{id}/nodes
async fn add_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(node): Json<Node>,
) -> ApiResult<WorkflowDefinition> {
    Ok(Json(state.editor.add_node(&id, node).await?))
}

/// PUT /api/definitions/{id}/nodes/{node_id}
async fn update_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
    Json(update): Json<NodeUpdate>,
) -> ApiResult<WorkflowDefinition> {
    Ok(Json(state.editor.update_node(&id, &node_id, update).await?))
}

/// DELETE /api/definitions/{id}/nodes/{node_id}
async fn delete_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
) -> ApiResult<WorkflowDefinition> {
    Ok(Json(state.editor.delete_node(&id, &node_id).await?))
}

/// POST /api/definitions/{id}/edges
async fn create_edge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(edge): Json<Edge>,
) -> ApiResult<WorkflowDefinition> {
    Ok(Json(state.editor.create_edge(&id, edge).await?))
}

/// PUT /api/definitions/{id}/edges/{edge_id}
async fn update_edge(
    State(state): State<AppState>,
    Path((id, edge_id)): Path<(String, String)>,
    Json(update): Json<EdgeUpdate>,
) -> ApiResult<WorkflowDefinition> {
    Ok(Json(state.editor.update_edge(&id, &edge_id, update).await?))
}

/// DELETE /api/definitions/{id}/edges/{edge_id}
async fn delete_edge(
    State(state): State<AppState>,
    Path((id, edge_id)): Path<(String, String)>,
) -> ApiResult<WorkflowDefinition> {
    Ok(Json(state.editor.delete_edge(&id, &edge_id).await?))
}
