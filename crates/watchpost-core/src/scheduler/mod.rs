//! Cron-driven scan jobs.

pub mod engine;
pub mod handle;
pub mod repo;

pub use engine::Scheduler;
pub use handle::JobHandle;
pub use repo::{JobRepository, MemoryJobRepository};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cron::CronSchedule;
use crate::error::{Result, WatchpostError};
use crate::notify::Channel;
use crate::rules::{AutomationRule, RuleFiring};
use crate::types::{ScanOptions, TargetResult};

fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// NotificationSettings
// ---------------------------------------------------------------------------

/// Direct notifications a job sends after each run, independent of
/// notification rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    #[serde(default)]
    pub on_complete: bool,
    #[serde(default)]
    pub on_failure: bool,
    #[serde(default)]
    pub on_critical_findings: bool,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub recipients: Vec<String>,
}

// ---------------------------------------------------------------------------
// JobSpec / JobPatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub name: String,
    pub targets: Vec<String>,
    pub cron_expression: String,
    #[serde(default)]
    pub scan_options: ScanOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_profile: Option<String>,
    #[serde(default)]
    pub exclusion_lists: Vec<String>,
    /// Registered in the config store on create; the job keeps their ids.
    #[serde(default)]
    pub automation_rules: Vec<AutomationRule>,
    /// Rules already in the config store.
    #[serde(default)]
    pub rule_ids: Vec<String>,
    #[serde(default)]
    pub notification_settings: NotificationSettings,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, targets: Vec<String>, cron_expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            targets,
            cron_expression: cron_expression.into(),
            scan_options: ScanOptions::default(),
            scan_profile: None,
            exclusion_lists: Vec::new(),
            automation_rules: Vec::new(),
            rule_ids: Vec::new(),
            notification_settings: NotificationSettings::default(),
            enabled: true,
        }
    }

    /// Returns the parsed schedule so callers need not parse twice.
    pub fn validate(&self) -> Result<CronSchedule> {
        if self.name.trim().is_empty() {
            return Err(WatchpostError::validation("job name is empty"));
        }
        if self.targets.is_empty() {
            return Err(WatchpostError::validation(format!(
                "job '{}' has no targets",
                self.name
            )));
        }
        if self.targets.iter().any(|t| t.trim().is_empty()) {
            return Err(WatchpostError::validation(format!(
                "job '{}' has a blank target",
                self.name
            )));
        }
        for rule in &self.automation_rules {
            rule.validate()?;
        }
        CronSchedule::parse(&self.cron_expression)
    }
}

/// Partial update. `automationRules` are registered and appended to the
/// (possibly replaced) `ruleIds` list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub targets: Option<Vec<String>>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub scan_options: Option<ScanOptions>,
    #[serde(default)]
    pub scan_profile: Option<String>,
    #[serde(default)]
    pub exclusion_lists: Option<Vec<String>>,
    #[serde(default)]
    pub automation_rules: Option<Vec<AutomationRule>>,
    #[serde(default)]
    pub rule_ids: Option<Vec<String>>,
    #[serde(default)]
    pub notification_settings: Option<NotificationSettings>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl JobPatch {
    pub fn apply_to(self, spec: &mut JobSpec) {
        if let Some(v) = self.name {
            spec.name = v;
        }
        if let Some(v) = self.targets {
            spec.targets = v;
        }
        if let Some(v) = self.cron_expression {
            spec.cron_expression = v;
        }
        if let Some(v) = self.scan_options {
            spec.scan_options = v;
        }
        if let Some(v) = self.scan_profile {
            spec.scan_profile = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = self.exclusion_lists {
            spec.exclusion_lists = v;
        }
        if let Some(v) = self.rule_ids {
            spec.rule_ids = v;
        }
        if let Some(v) = self.automation_rules {
            spec.automation_rules = v;
        }
        if let Some(v) = self.notification_settings {
            spec.notification_settings = v;
        }
        if let Some(v) = self.enabled {
            spec.enabled = v;
        }
    }
}

// ---------------------------------------------------------------------------
// ScheduledJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    pub targets: Vec<String>,
    pub cron_expression: String,
    #[serde(default)]
    pub scan_options: ScanOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_profile: Option<String>,
    #[serde(default)]
    pub exclusion_lists: Vec<String>,
    #[serde(default)]
    pub rule_ids: Vec<String>,
    #[serde(default)]
    pub notification_settings: NotificationSettings,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u64,
}

impl ScheduledJob {
    /// A fresh job; `next_run` is left for the scheduler to fill in.
    /// Inline automation rules must already be registered into `rule_ids`.
    pub fn from_spec(id: String, spec: JobSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: spec.name,
            targets: spec.targets,
            cron_expression: spec.cron_expression,
            scan_options: spec.scan_options,
            scan_profile: spec.scan_profile,
            exclusion_lists: spec.exclusion_lists,
            rule_ids: spec.rule_ids,
            notification_settings: spec.notification_settings,
            enabled: spec.enabled,
            created_at: now,
            updated_at: now,
            last_run: None,
            next_run: None,
            run_count: 0,
        }
    }

    pub fn to_spec(&self) -> JobSpec {
        JobSpec {
            name: self.name.clone(),
            targets: self.targets.clone(),
            cron_expression: self.cron_expression.clone(),
            scan_options: self.scan_options.clone(),
            scan_profile: self.scan_profile.clone(),
            exclusion_lists: self.exclusion_lists.clone(),
            automation_rules: Vec::new(),
            rule_ids: self.rule_ids.clone(),
            notification_settings: self.notification_settings.clone(),
            enabled: self.enabled,
        }
    }

    /// Same id, counters and history fields; everything else from `spec`.
    pub fn with_spec(&self, spec: JobSpec, now: DateTime<Utc>) -> Self {
        Self {
            created_at: self.created_at,
            last_run: self.last_run,
            run_count: self.run_count,
            next_run: self.next_run,
            updated_at: now,
            ..Self::from_spec(self.id.clone(), spec, now)
        }
    }
}

// ---------------------------------------------------------------------------
// JobRun
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

/// One tick's batch: an entry per target plus every rule that fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub id: String,
    pub job_id: String,
    pub job_name: String,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub results: Vec<TargetResult>,
    #[serde(default)]
    pub firings: Vec<RuleFiring>,
    pub run_count: u64,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
}

impl JobRun {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}
