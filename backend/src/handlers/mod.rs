use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;
use std::sync::Arc;

use crate::{database, AppState};

pub mod workflows;

pub use workflows::workflow_routes;

pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let database_healthy = database::health_check(&state.db).await;
    let status = if database_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if database_healthy { "healthy" } else { "degraded" },
            "service": "lattice-api",
            "database": database_healthy,
        })),
    )
}
