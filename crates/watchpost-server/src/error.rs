use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use watchpost_core::WatchpostError;

/// Carries an explicit 400 through the `anyhow::Error` chain for request
/// problems the core never sees (malformed path values, bad limits).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct BadRequest(String);

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses. Bodies are `{"error": "..."}`.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequest(msg.into()).into())
    }

    fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<BadRequest>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        match self.0.downcast_ref::<WatchpostError>() {
            Some(e) => match e {
                WatchpostError::Validation(_) => StatusCode::BAD_REQUEST,
                WatchpostError::NotFound { .. } => StatusCode::NOT_FOUND,
                WatchpostError::ActionNotSupported(_) | WatchpostError::Template(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                WatchpostError::Provider { .. }
                | WatchpostError::Transport { .. }
                | WatchpostError::Action { .. } => StatusCode::BAD_GATEWAY,
                WatchpostError::Cancelled(_) => StatusCode::CONFLICT,
                WatchpostError::History(_)
                | WatchpostError::Store(_)
                | WatchpostError::Io(_)
                | WatchpostError::Yaml(_)
                | WatchpostError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: WatchpostError) -> StatusCode {
        AppError(err.into()).into_response().status()
    }

    #[test]
    fn validation_maps_to_400() {
        assert_eq!(
            status_of(WatchpostError::validation("bad cron")),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(
            status_of(WatchpostError::not_found("job", "j1")),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn unsupported_action_maps_to_422() {
        assert_eq!(
            status_of(WatchpostError::ActionNotSupported("reboot".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn upstream_failures_map_to_502() {
        assert_eq!(
            status_of(WatchpostError::Provider {
                target: "a.com".into(),
                message: "timeout".into(),
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(WatchpostError::Transport {
                channel: "slack".into(),
                message: "500".into(),
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn other_errors_map_to_500() {
        let err = AppError(anyhow::anyhow!("something unexpected"));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bad_request_constructor_maps_to_400() {
        let err = AppError::bad_request("limit must be positive");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
