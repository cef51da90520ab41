//! The external scan provider seam.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{Result, WatchpostError};
use crate::types::{ScanOptions, ScanResult};

#[async_trait]
pub trait ScanProvider: Send + Sync {
    /// Scan one target. The returned document must pass `ScanResult::validate`.
    async fn run_scan(&self, target: &str, options: &ScanOptions) -> Result<ScanResult>;
}

fn provider_error(target: &str, message: impl Into<String>) -> WatchpostError {
    WatchpostError::Provider {
        target: target.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// HttpScanProvider
// ---------------------------------------------------------------------------

/// `POST {base_url}/scans` with `{target, options}`; the response body is the
/// normalized scan result.
pub struct HttpScanProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpScanProvider {
    pub fn new(base_url: &str, cfg: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| WatchpostError::validation(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        })
    }
}

#[async_trait]
impl ScanProvider for HttpScanProvider {
    async fn run_scan(&self, target: &str, options: &ScanOptions) -> Result<ScanResult> {
        let mut req = self
            .client
            .post(format!("{}/scans", self.base_url))
            .json(&json!({ "target": target, "options": options }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| provider_error(target, e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(provider_error(
                target,
                format!("HTTP {status}: {}", text.trim()),
            ));
        }
        let result: ScanResult = resp
            .json()
            .await
            .map_err(|e| provider_error(target, format!("malformed scan result: {e}")))?;
        result.validate()?;
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// UnconfiguredProvider
// ---------------------------------------------------------------------------

/// Stands in when no provider is configured; every scan fails.
pub struct UnconfiguredProvider;

#[async_trait]
impl ScanProvider for UnconfiguredProvider {
    async fn run_scan(&self, target: &str, _options: &ScanOptions) -> Result<ScanResult> {
        Err(provider_error(target, "no scan provider configured"))
    }
}

pub fn from_config(cfg: &ProviderConfig) -> Result<Arc<dyn ScanProvider>> {
    match &cfg.base_url {
        Some(url) => Ok(Arc::new(HttpScanProvider::new(url, cfg)?)),
        None => Ok(Arc::new(UnconfiguredProvider)),
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------
