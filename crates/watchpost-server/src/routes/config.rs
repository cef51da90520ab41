//! Configuration entities: automation rules, detection rules, scan profiles
//! and exclusion lists.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use watchpost_core::rules::{AutomationRule, DetectionRule};
use watchpost_core::store::{ExclusionList, ScanProfile};

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/rules
pub async fn list_rules(State(app): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.engine.store.list_rules()?))
}

/// POST /api/rules
pub async fn create_rule(
    State(app): State<AppState>,
    Json(rule): Json<AutomationRule>,
) -> Result<impl IntoResponse, AppError> {
    let rule = app.engine.store.put_rule(rule)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// DELETE /api/rules/{id}
pub async fn delete_rule(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = app.engine.store.delete_rule(&id)?;
    Ok(Json(json!({ "id": id, "deleted": deleted })))
}

/// GET /api/detection-rules
pub async fn list_detection_rules(State(app): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.engine.store.list_detection_rules()?))
}

/// POST /api/detection-rules
pub async fn create_detection_rule(
    State(app): State<AppState>,
    Json(rule): Json<DetectionRule>,
) -> Result<impl IntoResponse, AppError> {
    let rule = app.engine.store.put_detection_rule(rule)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// GET /api/profiles
pub async fn list_profiles(State(app): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.engine.store.list_profiles()?))
}

/// POST /api/profiles
pub async fn create_profile(
    State(app): State<AppState>,
    Json(profile): Json<ScanProfile>,
) -> Result<impl IntoResponse, AppError> {
    let profile = app.engine.store.put_profile(profile)?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// GET /api/exclusions
pub async fn list_exclusions(State(app): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.engine.store.list_exclusions()?))
}

/// POST /api/exclusions
pub async fn create_exclusion(
    State(app): State<AppState>,
    Json(list): Json<ExclusionList>,
) -> Result<impl IntoResponse, AppError> {
    let list = app.engine.store.put_exclusion(list)?;
    Ok((StatusCode::CREATED, Json(list)))
}
