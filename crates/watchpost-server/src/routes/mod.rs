pub mod config;
pub mod events;
pub mod notifications;
pub mod schedules;
pub mod workflows;

use serde::Deserialize;

use crate::error::AppError;

const DEFAULT_LIMIT: usize = 50;

/// `?limit=N` on history listings.
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    pub fn resolve(&self) -> Result<usize, AppError> {
        match self.limit {
            Some(0) => Err(AppError::bad_request("limit must be positive")),
            Some(n) => Ok(n),
            None => Ok(DEFAULT_LIMIT),
        }
    }
}

/// Run a history read off the async runtime; the redb backend blocks.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> watchpost_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let out = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(out)
}
