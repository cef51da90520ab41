use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use watchpost_core::notify::{Channel, NotificationRule, SendOptions};

use super::{blocking, LimitQuery};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TestRequest {
    pub channel: Channel,
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// POST /api/notifications/test: send the built-in test template. A failed
/// delivery still returns the recorded notification.
pub async fn send_test(
    State(app): State<AppState>,
    Json(req): Json<TestRequest>,
) -> Result<impl IntoResponse, AppError> {
    let notification = app
        .engine
        .dispatcher
        .test_channel(req.channel, &SendOptions::to(req.recipients))
        .await?;
    Ok(Json(notification))
}

/// GET /api/notifications: newest first.
pub async fn list_notifications(
    State(app): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = q.resolve()?;
    let dispatcher = app.engine.dispatcher.clone();
    let notifications = blocking(move || dispatcher.history(limit)).await?;
    Ok(Json(notifications))
}

/// GET /api/notifications/stats
pub async fn notification_stats(State(app): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let dispatcher = app.engine.dispatcher.clone();
    let stats = blocking(move || dispatcher.stats()).await?;
    Ok(Json(stats))
}

/// GET /api/notifications/rules
pub async fn list_rules(State(app): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(app.engine.store.list_notification_rules()?))
}

/// POST /api/notifications/rules
pub async fn create_rule(
    State(app): State<AppState>,
    Json(rule): Json<NotificationRule>,
) -> Result<impl IntoResponse, AppError> {
    let rule = app.engine.store.put_notification_rule(rule)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// DELETE /api/notifications/rules/{id}
pub async fn delete_rule(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = app.engine.store.delete_notification_rule(&id)?;
    Ok(Json(json!({ "id": id, "deleted": deleted })))
}

/// POST /api/notifications/trigger/{trigger}: the body is the data the
/// rules' conditions and templates see.
pub async fn process_trigger(
    State(app): State<AppState>,
    Path(trigger): Path<String>,
    Json(data): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let dispatched = app.engine.dispatcher.process_trigger(&trigger, &data).await?;
    Ok(Json(dispatched))
}
