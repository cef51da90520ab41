//! Explicitly triggered, strictly sequential step pipelines.

pub mod engine;
pub mod repo;

pub use engine::{WorkflowDeps, WorkflowEngine};
pub use repo::{MemoryWorkflowRepository, WorkflowRepository};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

use crate::condition::Condition;
use crate::error::{Result, WatchpostError};
use crate::notify::Channel;
use crate::rules::RuleAction;
use crate::types::ScanOptions;

fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Scan,
    Notify,
    Wait,
    Condition,
    Action,
}

impl StepType {
    pub fn as_str(self) -> &'static str {
        match self {
            StepType::Scan => "scan",
            StepType::Notify => "notify",
            StepType::Wait => "wait",
            StepType::Condition => "condition",
            StepType::Action => "action",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step. `config` is kept as written; string values may hold
/// `{{placeholders}}` that are rendered against the execution context
/// right before the step runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStepConfig {
    pub target: String,
    #[serde(default)]
    pub options: ScanOptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyStepConfig {
    #[serde(rename = "type")]
    pub notification_type: String,
    pub channel: Channel,
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Merged over the execution context as template data.
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitStepConfig {
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub seconds: Option<u64>,
}

impl WaitStepConfig {
    pub fn duration(&self, max_wait_secs: u64) -> Result<Duration> {
        let duration = match (self.duration_ms, self.seconds) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, Some(s)) => Duration::from_secs(s),
            (None, None) => {
                return Err(WatchpostError::validation(
                    "wait step needs durationMs or seconds",
                ))
            }
        };
        if duration.is_zero() {
            return Err(WatchpostError::validation("wait duration must be positive"));
        }
        if duration > Duration::from_secs(max_wait_secs) {
            return Err(WatchpostError::validation(format!(
                "wait of {}s exceeds the {max_wait_secs}s limit",
                duration.as_secs()
            )));
        }
        Ok(duration)
    }
}

fn default_output_key() -> String {
    "condition".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionStepConfig {
    #[serde(flatten)]
    pub condition: Condition,
    #[serde(default = "default_output_key")]
    pub output_key: String,
    #[serde(default)]
    pub halt_on_false: bool,
}

pub(crate) fn parse_config<T: DeserializeOwned>(step_type: StepType, config: &Value) -> Result<T> {
    serde_json::from_value(config.clone())
        .map_err(|e| WatchpostError::validation(format!("{step_type} step config: {e}")))
}

impl WorkflowStep {
    pub fn new(step_type: StepType, config: Value) -> Self {
        Self { step_type, config }
    }

    /// Shape checks only; templated strings are not resolved here.
    pub fn validate(&self, max_wait_secs: u64) -> Result<()> {
        match self.step_type {
            StepType::Scan => {
                let cfg: ScanStepConfig = parse_config(self.step_type, &self.config)?;
                if cfg.target.trim().is_empty() {
                    return Err(WatchpostError::validation("scan step target is empty"));
                }
            }
            StepType::Notify => {
                let cfg: NotifyStepConfig = parse_config(self.step_type, &self.config)?;
                if cfg.notification_type.trim().is_empty() {
                    return Err(WatchpostError::validation("notify step type is empty"));
                }
            }
            StepType::Wait => {
                let cfg: WaitStepConfig = parse_config(self.step_type, &self.config)?;
                cfg.duration(max_wait_secs)?;
            }
            StepType::Condition => {
                let cfg: ConditionStepConfig = parse_config(self.step_type, &self.config)?;
                cfg.condition.validate_operator()?;
            }
            StepType::Action => {
                let _: RuleAction = parse_config(self.step_type, &self.config)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowTrigger {
    #[default]
    Manual,
    Event { event: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default)]
    pub trigger: WorkflowTrigger,
    pub steps: Vec<WorkflowStep>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl WorkflowSpec {
    pub fn validate(&self, max_wait_secs: u64) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WatchpostError::validation("workflow name is empty"));
        }
        if self.steps.is_empty() {
            return Err(WatchpostError::validation(format!(
                "workflow '{}' has no steps",
                self.name
            )));
        }
        if let WorkflowTrigger::Event { event } = &self.trigger {
            if event.trim().is_empty() {
                return Err(WatchpostError::validation("event trigger needs an event name"));
            }
        }
        for (index, step) in self.steps.iter().enumerate() {
            step.validate(max_wait_secs).map_err(|e| {
                WatchpostError::validation(format!("step {index}: {}", strip_prefix(&e)))
            })?;
        }
        Ok(())
    }
}

fn strip_prefix(e: &WatchpostError) -> String {
    match e {
        WatchpostError::Validation(msg) => msg.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub trigger: WorkflowTrigger,
    pub steps: Vec<WorkflowStep>,
    pub enabled: bool,
    #[serde(default)]
    pub execution_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn from_spec(id: String, spec: WorkflowSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: spec.name,
            trigger: spec.trigger,
            steps: spec.steps,
            enabled: spec.enabled,
            execution_count: 0,
            created_at: now,
        }
    }

    pub fn listens_for(&self, event: &str) -> bool {
        matches!(&self.trigger, WorkflowTrigger::Event { event: e } if e == event)
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub index: usize,
    pub step_type: StepType,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// One run of a workflow. `steps_completed` only grows, and the record is
/// frozen once the status leaves `Running`. A failed run's last record is
/// the failing step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub context: Map<String, Value>,
    pub steps_completed: Vec<StepRecord>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowExecution {
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.completed_at
            .or(self.failed_at)
            .unwrap_or(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(steps: Value) -> WorkflowSpec {
        serde_json::from_value(json!({ "name": "triage", "steps": steps })).unwrap()
    }

    #[test]
    fn trigger_defaults_to_manual() {
        let wf = spec(json!([{ "type": "wait", "config": { "seconds": 5 } }]));
        assert_eq!(wf.trigger, WorkflowTrigger::Manual);
        assert!(wf.enabled);
        assert!(wf.validate(60).is_ok());
    }

    #[test]
    fn event_trigger_parses() {
        let wf: WorkflowSpec = serde_json::from_value(json!({
            "name": "on-critical",
            "trigger": { "type": "event", "event": "critical_finding" },
            "steps": [{ "type": "notify", "config": { "type": "alert", "channel": "slack" } }]
        }))
        .unwrap();
        assert_eq!(
            wf.trigger,
            WorkflowTrigger::Event {
                event: "critical_finding".into()
            }
        );
        assert!(wf.validate(60).is_ok());
    }

    #[test]
    fn unknown_step_type_fails_to_parse() {
        let err = serde_json::from_value::<WorkflowSpec>(json!({
            "name": "x",
            "steps": [{ "type": "teleport" }]
        }));
        assert!(err.is_err());
    }

    #[test]
    fn wait_limits_are_enforced() {
        assert!(spec(json!([{ "type": "wait", "config": { "seconds": 0 } }]))
            .validate(60)
            .is_err());
        assert!(spec(json!([{ "type": "wait", "config": { "seconds": 61 } }]))
            .validate(60)
            .is_err());
        assert!(spec(json!([{ "type": "wait", "config": {} }]))
            .validate(60)
            .is_err());
        assert!(spec(json!([{ "type": "wait", "config": { "durationMs": 1500 } }]))
            .validate(60)
            .is_ok());
    }

    #[test]
    fn step_errors_name_the_index() {
        let err = spec(json!([
            { "type": "wait", "config": { "seconds": 1 } },
            { "type": "scan", "config": { "target": "" } }
        ]))
        .validate(60)
        .unwrap_err();
        assert_eq!(err.to_string(), "validation failed: step 1: scan step target is empty");
    }

    #[test]
    fn condition_step_flattens_condition() {
        let cfg: ConditionStepConfig = parse_config(
            StepType::Condition,
            &json!({ "field": "security_score", "operator": "less_than", "threshold": 70, "haltOnFalse": true }),
        )
        .unwrap();
        assert_eq!(cfg.condition.field, "security_score");
        assert_eq!(cfg.output_key, "condition");
        assert!(cfg.halt_on_false);
    }

    #[test]
    fn empty_workflow_is_rejected() {
        assert!(spec(json!([])).validate(60).is_err());
    }
}
