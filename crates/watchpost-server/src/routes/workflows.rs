use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Map, Value};
use watchpost_core::workflow::WorkflowSpec;

use super::{blocking, LimitQuery};
use crate::error::AppError;
use crate::state::AppState;

type Context = Option<Json<Map<String, Value>>>;

fn context(body: Context) -> Map<String, Value> {
    body.map(|Json(m)| m).unwrap_or_default()
}

/// GET /api/workflows
pub async fn list_workflows(State(app): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.engine.workflows.list_workflows()?))
}

/// POST /api/workflows
pub async fn create_workflow(
    State(app): State<AppState>,
    Json(spec): Json<WorkflowSpec>,
) -> Result<impl IntoResponse, AppError> {
    let workflow = app.engine.workflows.create_workflow(spec)?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

/// GET /api/workflows/{id}
pub async fn get_workflow(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.engine.workflows.get_workflow(&id)?))
}

/// DELETE /api/workflows/{id}: pending waits of running executions are
/// interrupted.
pub async fn delete_workflow(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = app.engine.workflows.delete_workflow(&id)?;
    Ok(Json(json!({ "id": id, "deleted": deleted })))
}

/// POST /api/workflows/{id}/execute: starts the execution and returns its
/// id without waiting for it to finish.
pub async fn execute_workflow(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Context,
) -> Result<impl IntoResponse, AppError> {
    let (execution_id, _handle) = app.engine.workflows.start(&id, context(body))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "workflowId": id, "executionId": execution_id })),
    ))
}

/// GET /api/workflows/{id}/executions: newest first.
pub async fn list_executions(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = q.resolve()?;
    let workflows = app.engine.workflows.clone();
    let executions = blocking(move || workflows.executions(Some(&id), limit)).await?;
    Ok(Json(executions))
}

/// POST /api/workflows/events/{event}: run every workflow listening for
/// the event and return their executions.
pub async fn trigger_event(
    State(app): State<AppState>,
    Path(event): Path<String>,
    body: Context,
) -> Result<impl IntoResponse, AppError> {
    let executions = app
        .engine
        .workflows
        .trigger_event(&event, context(body))
        .await?;
    Ok(Json(executions))
}
