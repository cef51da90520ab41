use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use watchpost_core::scheduler::{JobPatch, JobSpec};

use super::{blocking, LimitQuery};
use crate::error::AppError;
use crate::state::AppState;

/// GET /api/schedules
pub async fn list_schedules(State(app): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.engine.scheduler.list_jobs()?))
}

/// POST /api/schedules: validate, persist and start the job's timer.
pub async fn create_schedule(
    State(app): State<AppState>,
    Json(spec): Json<JobSpec>,
) -> Result<impl IntoResponse, AppError> {
    let job = app.engine.scheduler.create_job(spec).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/schedules/{id}
pub async fn get_schedule(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.engine.scheduler.get_job(&id)?))
}

/// PATCH /api/schedules/{id}: absent fields keep their value.
pub async fn update_schedule(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<JobPatch>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.engine.scheduler.update_job(&id, patch).await?))
}

/// DELETE /api/schedules/{id}: deleting an unknown job is not an error.
pub async fn delete_schedule(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = app.engine.scheduler.delete_job(&id).await?;
    Ok(Json(json!({ "id": id, "deleted": deleted })))
}

/// POST /api/schedules/{id}/run: run now and wait for the run record.
pub async fn run_schedule(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    match app.engine.scheduler.trigger_now(&id).await? {
        Some(run) => Ok((StatusCode::OK, Json(json!(run)))),
        None => Ok((
            StatusCode::CONFLICT,
            Json(json!({ "error": format!("job '{id}' is already running") })),
        )),
    }
}

/// GET /api/schedules/{id}/runs: newest first.
pub async fn list_runs(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = q.resolve()?;
    let scheduler = app.engine.scheduler.clone();
    let runs = blocking(move || scheduler.job_runs(&id, limit)).await?;
    Ok(Json(runs))
}
