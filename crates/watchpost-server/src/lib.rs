pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use watchpost_core::Engine;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve_on()` and available for integration testing.
pub fn build_router(engine: Engine) -> Router {
    let app_state = state::AppState::new(engine);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Schedules
        .route(
            "/api/schedules",
            get(routes::schedules::list_schedules).post(routes::schedules::create_schedule),
        )
        .route(
            "/api/schedules/{id}",
            get(routes::schedules::get_schedule)
                .patch(routes::schedules::update_schedule)
                .delete(routes::schedules::delete_schedule),
        )
        .route("/api/schedules/{id}/run", post(routes::schedules::run_schedule))
        .route("/api/schedules/{id}/runs", get(routes::schedules::list_runs))
        // Workflows
        .route(
            "/api/workflows",
            get(routes::workflows::list_workflows).post(routes::workflows::create_workflow),
        )
        .route(
            "/api/workflows/events/{event}",
            post(routes::workflows::trigger_event),
        )
        .route(
            "/api/workflows/{id}",
            get(routes::workflows::get_workflow).delete(routes::workflows::delete_workflow),
        )
        .route(
            "/api/workflows/{id}/execute",
            post(routes::workflows::execute_workflow),
        )
        .route(
            "/api/workflows/{id}/executions",
            get(routes::workflows::list_executions),
        )
        // Notifications
        .route(
            "/api/notifications",
            get(routes::notifications::list_notifications),
        )
        .route("/api/notifications/test", post(routes::notifications::send_test))
        .route(
            "/api/notifications/stats",
            get(routes::notifications::notification_stats),
        )
        .route(
            "/api/notifications/rules",
            get(routes::notifications::list_rules).post(routes::notifications::create_rule),
        )
        .route(
            "/api/notifications/rules/{id}",
            delete(routes::notifications::delete_rule),
        )
        .route(
            "/api/notifications/trigger/{trigger}",
            post(routes::notifications::process_trigger),
        )
        // Configuration
        .route(
            "/api/rules",
            get(routes::config::list_rules).post(routes::config::create_rule),
        )
        .route(
            "/api/rules/{id}",
            delete(routes::config::delete_rule),
        )
        .route(
            "/api/detection-rules",
            get(routes::config::list_detection_rules).post(routes::config::create_detection_rule),
        )
        .route(
            "/api/profiles",
            get(routes::config::list_profiles).post(routes::config::create_profile),
        )
        .route(
            "/api/exclusions",
            get(routes::config::list_exclusions).post(routes::config::create_exclusion),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Serve the API on a pre-bound listener until `shutdown` resolves.
///
/// Accepting a bound `TcpListener` lets the caller read the actual port
/// first (useful when binding port 0).
pub async fn serve_on<F>(
    engine: Engine,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let actual_port = listener.local_addr()?.port();
    let app = build_router(engine);

    tracing::info!("watchpost API listening on http://localhost:{actual_port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
