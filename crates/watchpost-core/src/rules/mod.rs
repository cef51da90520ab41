//! Automation and detection rules: a condition over a scan result paired
//! with an action from the fixed handler registry.

pub mod actions;
pub mod engine;

pub use actions::{ActionContext, ActionHandler, ActionRegistry};
pub use engine::{FiringOutcome, RuleEngine, RuleFiring};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::condition::Condition;
use crate::error::Result;
use crate::notify::Channel;
use crate::types::RiskLevel;

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    SendAlert,
    BlockIps,
    TriggerIncident,
    RunAdditionalScan,
    UpdateBlocklist,
    Unknown(String),
}

impl ActionKind {
    pub fn all() -> &'static [ActionKind] {
        &[
            ActionKind::SendAlert,
            ActionKind::BlockIps,
            ActionKind::TriggerIncident,
            ActionKind::RunAdditionalScan,
            ActionKind::UpdateBlocklist,
        ]
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::SendAlert => "send_alert",
            ActionKind::BlockIps => "block_ips",
            ActionKind::TriggerIncident => "trigger_incident",
            ActionKind::RunAdditionalScan => "run_additional_scan",
            ActionKind::UpdateBlocklist => "update_blocklist",
            ActionKind::Unknown(s) => s,
        }
    }
}

impl From<String> for ActionKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "send_alert" => ActionKind::SendAlert,
            "block_ips" => ActionKind::BlockIps,
            "trigger_incident" => ActionKind::TriggerIncident,
            "run_additional_scan" => ActionKind::RunAdditionalScan,
            "update_blocklist" => ActionKind::UpdateBlocklist,
            _ => ActionKind::Unknown(s),
        }
    }
}

impl From<ActionKind> for String {
    fn from(k: ActionKind) -> Self {
        k.as_str().to_string()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RuleAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub config: Value,
}

impl RuleAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            config: Value::Null,
        }
    }

    pub fn with_config(kind: ActionKind, config: Value) -> Self {
        Self { kind, config }
    }
}

fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// AutomationRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRule {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub condition: Condition,
    pub action: RuleAction,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub triggered_count: u64,
}

impl AutomationRule {
    pub fn new(name: impl Into<String>, condition: Condition, action: RuleAction) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            condition,
            action,
            enabled: true,
            triggered_count: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::WatchpostError::validation("rule name is empty"));
        }
        self.condition.validate_for_scan()
    }
}

// ---------------------------------------------------------------------------
// DetectionRule
// ---------------------------------------------------------------------------

/// A categorized rule evaluated against every scan result; a match raises a
/// severity-classified alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRule {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub category: String,
    pub severity: RiskLevel,
    pub condition: Condition,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub triggered_count: u64,
}

impl DetectionRule {
    pub fn validate(&self) -> Result<()> {
        if self.category.trim().is_empty() {
            return Err(crate::WatchpostError::validation(format!(
                "detection rule '{}' has no category",
                self.name
            )));
        }
        self.condition.validate_for_scan()
    }

    /// The alert action this rule dispatches when it matches.
    pub fn alert_action(&self) -> RuleAction {
        let channels: Vec<&str> = self.channels.iter().map(|c| c.as_str()).collect();
        let mut config = serde_json::json!({
            "severity": self.severity.as_str(),
            "category": self.category,
        });
        if !channels.is_empty() {
            config["channels"] = serde_json::json!(channels);
        }
        RuleAction::with_config(ActionKind::SendAlert, config)
    }
}
