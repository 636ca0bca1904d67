// Workflow endpoints - execution inspection and manual trigger testing

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiResult, AppError};
use crate::workflows::{
    TriggerEvent, TriggerType, WorkflowExecution, WorkflowExecutionLog,
};
use crate::AppState;

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/executions", get(list_executions))
        .route("/executions/:id/logs", get(execution_logs))
        .route("/test", post(test_trigger))
}

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    pub tenant_id: Uuid,
    pub workflow_id: Option<Uuid>,
    pub limit: Option<i64>,
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExecutionsQuery>,
) -> ApiResult<Json<Vec<WorkflowExecution>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let executions = state
        .store
        .list_executions(query.tenant_id, query.workflow_id, limit)
        .await?;
    Ok(Json(executions))
}

async fn execution_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<WorkflowExecutionLog>>> {
    if state.store.execution(id).await?.is_none() {
        return Err(AppError::NotFound("Execution".to_string()));
    }
    let logs = state.store.execution_logs(id).await?;
    Ok(Json(logs))
}

/// Manually fire a trigger event, mainly for testing workflows from
/// the admin UI. Executions run in the background; the response only
/// says which ones started.
#[derive(Debug, Deserialize)]
pub struct TestTriggerRequest {
    pub tenant_id: Uuid,
    pub trigger_type: TriggerType,
    pub entity_id: Uuid,
    pub entity_type: String,
    #[serde(default)]
    pub data: Value,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct TestTriggerResponse {
    pub started: usize,
    pub execution_ids: Vec<Uuid>,
}

async fn test_trigger(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TestTriggerRequest>,
) -> ApiResult<Json<TestTriggerResponse>> {
    if request.entity_type.is_empty() {
        return Err(AppError::BadRequest("entity_type is required".to_string()));
    }

    let event = TriggerEvent::new(
        request.trigger_type,
        request.tenant_id,
        request.entity_id,
        &request.entity_type,
        request.data,
        request.user_id,
    );

    let execution_ids = state.engine.process_trigger(&event).await?;
    Ok(Json(TestTriggerResponse {
        started: execution_ids.len(),
        execution_ids,
    }))
}
