//! Side-effecting security controls invoked by rule actions: firewall
//! blocks, incident tickets and blocklist updates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::config::ControlsConfig;
use crate::error::{Result, WatchpostError};
use crate::types::RiskLevel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRequest {
    pub title: String,
    pub severity: RiskLevel,
    pub target: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

#[async_trait]
pub trait SecurityControls: Send + Sync {
    async fn block_ips(&self, ips: &[String], reason: &str) -> Result<Value>;
    async fn open_incident(&self, incident: &IncidentRequest) -> Result<Value>;
    async fn update_blocklist(&self, entries: &[String], reason: &str) -> Result<Value>;
}

fn action_error(action: &str, message: impl Into<String>) -> WatchpostError {
    WatchpostError::Action {
        action: action.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// HttpSecurityControls
// ---------------------------------------------------------------------------

pub struct HttpSecurityControls {
    client: reqwest::Client,
    cfg: ControlsConfig,
}

impl HttpSecurityControls {
    pub fn new(cfg: &ControlsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| WatchpostError::validation(format!("http client: {e}")))?;
        Ok(Self {
            client,
            cfg: cfg.clone(),
        })
    }

    async fn post(&self, action: &str, url: Option<&String>, body: Value) -> Result<Value> {
        let url = url.ok_or_else(|| action_error(action, "no endpoint configured"))?;
        let mut req = self.client.post(url).json(&body);
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| action_error(action, e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(action_error(action, format!("HTTP {status}: {}", text.trim())));
        }
        // Endpoints that answer with an empty or non-JSON body still succeeded.
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "status": status.as_u16() })))
    }
}

#[async_trait]
impl SecurityControls for HttpSecurityControls {
    async fn block_ips(&self, ips: &[String], reason: &str) -> Result<Value> {
        self.post(
            "block_ips",
            self.cfg.firewall_url.as_ref(),
            json!({ "ips": ips, "reason": reason }),
        )
        .await
    }

    async fn open_incident(&self, incident: &IncidentRequest) -> Result<Value> {
        self.post(
            "trigger_incident",
            self.cfg.incident_url.as_ref(),
            serde_json::to_value(incident)?,
        )
        .await
    }

    async fn update_blocklist(&self, entries: &[String], reason: &str) -> Result<Value> {
        self.post(
            "update_blocklist",
            self.cfg.blocklist_url.as_ref(),
            json!({ "entries": entries, "reason": reason }),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// RecordingControls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCall {
    BlockIps { ips: Vec<String>, reason: String },
    OpenIncident(IncidentRequest),
    UpdateBlocklist { entries: Vec<String>, reason: String },
}

/// Records calls instead of performing them. Backs `controls.dry_run`.
#[derive(Default)]
pub struct RecordingControls {
    calls: Mutex<Vec<ControlCall>>,
}

impl RecordingControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ControlCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push(&self, call: ControlCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl SecurityControls for RecordingControls {
    async fn block_ips(&self, ips: &[String], reason: &str) -> Result<Value> {
        self.push(ControlCall::BlockIps {
            ips: ips.to_vec(),
            reason: reason.to_string(),
        });
        Ok(json!({ "dryRun": true, "blocked": ips }))
    }

    async fn open_incident(&self, incident: &IncidentRequest) -> Result<Value> {
        self.push(ControlCall::OpenIncident(incident.clone()));
        Ok(json!({ "dryRun": true, "incidentId": Uuid::new_v4().to_string() }))
    }

    async fn update_blocklist(&self, entries: &[String], reason: &str) -> Result<Value> {
        self.push(ControlCall::UpdateBlocklist {
            entries: entries.to_vec(),
            reason: reason.to_string(),
        });
        Ok(json!({ "dryRun": true, "added": entries }))
    }
}

pub fn from_config(cfg: &ControlsConfig) -> Result<Arc<dyn SecurityControls>> {
    if cfg.dry_run {
        Ok(Arc::new(RecordingControls::new()))
    } else {
        Ok(Arc::new(HttpSecurityControls::new(cfg)?))
    }
}
