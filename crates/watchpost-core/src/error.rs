use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchpostError {
    /// Rejected configuration: bad cron, rule, step or template input.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("scan provider failed for '{target}': {message}")]
    Provider { target: String, message: String },

    #[error("action '{action}' failed: {message}")]
    Action { action: String, message: String },

    #[error("action not supported: {0}")]
    ActionNotSupported(String),

    #[error("no template for '{0}'")]
    Template(String),

    #[error("{channel} delivery failed: {message}")]
    Transport { channel: String, message: String },

    #[error("history store error: {0}")]
    History(String),

    #[error("store error: {0}")]
    Store(String),

    /// A workflow step interrupted because its workflow was deleted.
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl WatchpostError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, WatchpostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_kind_and_id() {
        let err = WatchpostError::not_found("job", "abc");
        assert_eq!(err.to_string(), "job not found: abc");
    }

    #[test]
    fn provider_error_mentions_target() {
        let err = WatchpostError::Provider {
            target: "a.com".into(),
            message: "timeout".into(),
        };
        assert!(err.to_string().contains("a.com"));
        assert!(err.to_string().contains("timeout"));
    }
}
