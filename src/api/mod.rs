/// HTTP API layer
///
/// Each core operation is exposed as a single structured call: a route taking
/// a typed JSON record and returning a typed result or a typed error body.
/// Request framing, authentication, and schema validation beyond serde remain
/// external collaborators.

use crate::error::WorkflowError;
use crate::registry::ActiveWorkflowRegistry;
use crate::workflow::{
    DefinitionCache, DefinitionStore, GraphEditor, SubWorkflowCoordinator, VersionController,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

pub mod definitions;
pub mod runs;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub store: DefinitionStore,
    pub cache: Arc<DefinitionCache>,
    pub versions: VersionController,
    pub editor: GraphEditor,
    pub subworkflows: SubWorkflowCoordinator,
    pub registry: ActiveWorkflowRegistry,
}

/// Wraps `WorkflowError` so handlers can use `?` and still hand back a typed
/// HTTP error body.
pub struct ApiError(WorkflowError);

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            WorkflowError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            WorkflowError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            WorkflowError::EndpointNotFound(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "endpoint_not_found")
            }
            WorkflowError::InvalidTransition(_) => (StatusCode::CONFLICT, "invalid_transition"),
            WorkflowError::AlreadyTerminal(_) => (StatusCode::CONFLICT, "already_terminal"),
            WorkflowError::LockNotHeld(_) => (StatusCode::CONFLICT, "lock_not_held"),
            WorkflowError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            WorkflowError::Storage(_) | WorkflowError::Serialization(_) => {
                tracing::error!("Internal error: {}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        let body = Json(json!({ "error": kind, "message": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Handler result alias used across the API modules.
pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;
