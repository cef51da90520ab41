//! The fixed action registry and its default handlers.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::controls::{IncidentRequest, SecurityControls};
use crate::error::{Result, WatchpostError};
use crate::notify::template::render_value;
use crate::notify::{Channel, NotificationDispatcher, NotificationStatus, SendOptions};
use crate::provider::ScanProvider;
use crate::types::{RiskLevel, ScanOptions, ScanResult};

use super::{ActionKind, RuleAction};

// ---------------------------------------------------------------------------
// ActionContext
// ---------------------------------------------------------------------------

/// Where an action was fired from and what it may read.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    pub rule_id: Option<String>,
    pub rule_name: Option<String>,
    pub job_id: Option<String>,
    pub execution_id: Option<String>,
    pub result: Option<ScanResult>,
    /// Extra data (workflow context, detection category, ...).
    pub data: Map<String, Value>,
}

impl ActionContext {
    pub fn for_rule(rule_id: &str, rule_name: &str, job_id: Option<&str>, result: &ScanResult) -> Self {
        Self {
            rule_id: Some(rule_id.to_string()),
            rule_name: Some(rule_name.to_string()),
            job_id: job_id.map(str::to_string),
            execution_id: None,
            result: Some(result.clone()),
            data: Map::new(),
        }
    }

    pub fn for_workflow(execution_id: &str, context: &Map<String, Value>) -> Self {
        Self {
            execution_id: Some(execution_id.to_string()),
            data: context.clone(),
            ..Self::default()
        }
    }

    pub fn target(&self) -> Option<String> {
        self.result
            .as_ref()
            .map(|r| r.target.clone())
            .or_else(|| self.data.get("target").and_then(Value::as_str).map(str::to_string))
    }

    /// Flat view for templates: scan summary fields, rule name, then `data`.
    pub fn template_data(&self) -> Value {
        let mut out = self
            .result
            .as_ref()
            .map(ScanResult::template_data)
            .unwrap_or_default();
        if let Some(name) = &self.rule_name {
            out.insert("rule_name".into(), Value::from(name.clone()));
        }
        if let Some(id) = &self.job_id {
            out.insert("job_id".into(), Value::from(id.clone()));
        }
        for (k, v) in &self.data {
            out.insert(k.clone(), v.clone());
        }
        Value::Object(out)
    }

    fn describe(&self) -> String {
        match (&self.rule_name, self.target()) {
            (Some(rule), Some(target)) => format!("rule '{rule}' matched {target}"),
            (Some(rule), None) => format!("rule '{rule}' matched"),
            (None, Some(target)) => format!("workflow action on {target}"),
            (None, None) => "workflow action".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionHandler / ActionRegistry
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, config: &Value, ctx: &ActionContext) -> Result<Value>;
}

#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five built-in handlers wired to their collaborators.
    pub fn with_defaults(
        dispatcher: Arc<NotificationDispatcher>,
        controls: Arc<dyn SecurityControls>,
        provider: Arc<dyn ScanProvider>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(ActionKind::SendAlert, Arc::new(SendAlert { dispatcher }));
        registry.register(
            ActionKind::BlockIps,
            Arc::new(BlockIps {
                controls: controls.clone(),
            }),
        );
        registry.register(
            ActionKind::TriggerIncident,
            Arc::new(TriggerIncident {
                controls: controls.clone(),
            }),
        );
        registry.register(
            ActionKind::RunAdditionalScan,
            Arc::new(RunAdditionalScan { provider }),
        );
        registry.register(ActionKind::UpdateBlocklist, Arc::new(UpdateBlocklist { controls }));
        registry
    }

    pub fn register(&mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Run the handler for `action.kind`. String values in the action config
    /// are rendered as templates against the context first.
    pub async fn dispatch(&self, action: &RuleAction, ctx: &ActionContext) -> Result<Value> {
        let Some(handler) = self.handlers.get(&action.kind) else {
            warn!(action = %action.kind, rule_id = ?ctx.rule_id, "action not supported");
            return Err(WatchpostError::ActionNotSupported(action.kind.to_string()));
        };
        let config = render_value(&action.config, &ctx.template_data());
        let output = handler.handle(&config, ctx).await?;
        info!(action = %action.kind, rule_id = ?ctx.rule_id, target = ?ctx.target(), "action dispatched");
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn str_list(config: &Value, key: &str) -> Vec<String> {
    match config.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn str_field<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn action_error(kind: ActionKind, message: impl Into<String>) -> WatchpostError {
    WatchpostError::Action {
        action: kind.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// send_alert
// ---------------------------------------------------------------------------

struct SendAlert {
    dispatcher: Arc<NotificationDispatcher>,
}

#[async_trait]
impl ActionHandler for SendAlert {
    async fn handle(&self, config: &Value, ctx: &ActionContext) -> Result<Value> {
        let channels = {
            let named = str_list(config, "channels");
            if named.is_empty() {
                vec![Channel::Email]
            } else {
                named
                    .iter()
                    .map(|c| c.parse())
                    .collect::<Result<Vec<Channel>>>()?
            }
        };
        let notification_type = str_field(config, "template").unwrap_or("alert");
        let severity = str_field(config, "severity")
            .map(str::to_string)
            .or_else(|| ctx.result.as_ref().map(|r| r.summary.risk_level.to_string()))
            .unwrap_or_else(|| RiskLevel::High.to_string());

        let mut data = ctx.template_data();
        if let Value::Object(map) = &mut data {
            map.insert("severity".into(), Value::from(severity));
            if let Some(category) = str_field(config, "category") {
                map.insert("category".into(), Value::from(category));
            }
        }
        let options = SendOptions::to(str_list(config, "recipients"));

        let mut sent = Vec::new();
        let mut delivered = 0;
        for result in self
            .dispatcher
            .send_all(notification_type, &channels, &data, &options)
            .await
        {
            match result {
                Ok(n) => {
                    if n.status == NotificationStatus::Sent {
                        delivered += 1;
                    }
                    sent.push(json!({"id": n.id, "channel": n.channel, "status": n.status}));
                }
                Err(e) => sent.push(json!({"error": e.to_string()})),
            }
        }
        if delivered == 0 {
            return Err(action_error(
                ActionKind::SendAlert,
                "no channel delivered the alert",
            ));
        }
        Ok(json!({ "notifications": sent }))
    }
}

// ---------------------------------------------------------------------------
// block_ips
// ---------------------------------------------------------------------------

struct BlockIps {
    controls: Arc<dyn SecurityControls>,
}

#[async_trait]
impl ActionHandler for BlockIps {
    async fn handle(&self, config: &Value, ctx: &ActionContext) -> Result<Value> {
        let ips = str_list(config, "ips");
        if ips.is_empty() {
            return Err(action_error(ActionKind::BlockIps, "config.ips is empty"));
        }
        let reason = str_field(config, "reason")
            .map(str::to_string)
            .unwrap_or_else(|| ctx.describe());
        self.controls.block_ips(&ips, &reason).await
    }
}

// ---------------------------------------------------------------------------
// trigger_incident
// ---------------------------------------------------------------------------

struct TriggerIncident {
    controls: Arc<dyn SecurityControls>,
}

#[async_trait]
impl ActionHandler for TriggerIncident {
    async fn handle(&self, config: &Value, ctx: &ActionContext) -> Result<Value> {
        let severity = match str_field(config, "severity") {
            Some(s) => s.parse::<RiskLevel>()?,
            None => RiskLevel::High,
        };
        let target = ctx.target().unwrap_or_default();
        let title = str_field(config, "title")
            .map(str::to_string)
            .unwrap_or_else(|| ctx.describe());
        let incident = IncidentRequest {
            title,
            severity,
            target,
            description: str_field(config, "description")
                .unwrap_or_default()
                .to_string(),
            details: ctx.template_data(),
        };
        self.controls.open_incident(&incident).await
    }
}

// ---------------------------------------------------------------------------
// run_additional_scan
// ---------------------------------------------------------------------------

struct RunAdditionalScan {
    provider: Arc<dyn ScanProvider>,
}

#[async_trait]
impl ActionHandler for RunAdditionalScan {
    async fn handle(&self, config: &Value, ctx: &ActionContext) -> Result<Value> {
        let target = str_field(config, "target")
            .map(str::to_string)
            .or_else(|| ctx.target())
            .ok_or_else(|| action_error(ActionKind::RunAdditionalScan, "no target"))?;
        let options: ScanOptions = match config.get("options") {
            Some(v) if !v.is_null() => serde_json::from_value(v.clone())?,
            _ => ScanOptions::default(),
        };
        let result = self.provider.run_scan(&target, &options).await?;
        Ok(json!({
            "target": result.target.clone(),
            "security_score": result.summary.security_score,
            "risk_level": result.summary.risk_level,
            "scan_result": result,
        }))
    }
}

// ---------------------------------------------------------------------------
// update_blocklist
// ---------------------------------------------------------------------------

struct UpdateBlocklist {
    controls: Arc<dyn SecurityControls>,
}

#[async_trait]
impl ActionHandler for UpdateBlocklist {
    async fn handle(&self, config: &Value, ctx: &ActionContext) -> Result<Value> {
        let mut entries = str_list(config, "entries");
        if entries.is_empty() {
            entries.extend(ctx.target());
        }
        if entries.is_empty() {
            return Err(action_error(
                ActionKind::UpdateBlocklist,
                "no entries and no target",
            ));
        }
        let reason = str_field(config, "reason")
            .map(str::to_string)
            .unwrap_or_else(|| ctx.describe());
        self.controls.update_blocklist(&entries, &reason).await
    }
}
