use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{Result, WatchpostError};
use crate::notify::template::{TemplateSet, TemplateSource};
use crate::notify::NotificationRule;
use crate::rules::{AutomationRule, DetectionRule};
use crate::scheduler::JobSpec;
use crate::store::{ExclusionList, ScanProfile};
use crate::workflow::WorkflowSpec;

pub const DEFAULT_CONFIG_FILE: &str = "watchpost.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on concurrent target scans within one tick.
    #[serde(default = "default_max_concurrent_scans")]
    pub max_concurrent_scans: usize,
    /// Per-target scan deadline.
    #[serde(default = "default_tick_timeout_secs")]
    pub tick_timeout_secs: u64,
}

fn default_max_concurrent_scans() -> usize {
    4
}

fn default_tick_timeout_secs() -> u64 {
    900
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: default_max_concurrent_scans(),
            tick_timeout_secs: default_tick_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

fn default_max_wait_secs() -> u64 {
    86_400
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// HistoryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// redb file for run/execution/notification history. In-memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// ProviderConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider_timeout_secs() -> u64 {
    300
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// HTTP mail relay endpoint accepting `{from, to, subject, text}`.
    pub api_url: String,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    /// HTTP SMS gateway accepting `{to, body}`.
    pub api_url: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Record messages in memory instead of delivering them.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_channel_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms: Option<SmsConfig>,
}

fn default_channel_timeout_secs() -> u64 {
    10
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            timeout_secs: default_channel_timeout_secs(),
            email: None,
            slack: None,
            webhook: None,
            sms: None,
        }
    }
}

impl ChannelsConfig {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.slack.is_none() && self.webhook.is_none() && self.sms.is_none()
    }
}

// ---------------------------------------------------------------------------
// ControlsConfig
// ---------------------------------------------------------------------------

/// Endpoints for the security-control side effects of rule actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlsConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocklist_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// SeedConfig
// ---------------------------------------------------------------------------

/// Entities loaded into the engine at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub profiles: Vec<ScanProfile>,
    #[serde(default)]
    pub exclusions: Vec<ExclusionList>,
    #[serde(default)]
    pub rules: Vec<AutomationRule>,
    #[serde(default)]
    pub detection_rules: Vec<DetectionRule>,
    #[serde(default)]
    pub notification_rules: Vec<NotificationRule>,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
    #[serde(default)]
    pub workflows: Vec<WorkflowSpec>,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub controls: ControlsConfig,
    /// Overrides keyed `<channel>_<type>`.
    #[serde(default)]
    pub templates: HashMap<String, TemplateSource>,
    #[serde(default)]
    pub seed: SeedConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(WatchpostError::not_found(
                "config file",
                path.display().to_string(),
            ));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(WatchpostError::NotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Templates: built-in defaults plus configured overrides.
    pub fn template_set(&self) -> Result<TemplateSet> {
        let mut set = TemplateSet::with_defaults();
        set.extend_from(&self.templates)?;
        Ok(set)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.scheduler.max_concurrent_scans == 0 {
            warnings.push(ConfigWarning::error(
                "scheduler.max_concurrent_scans must be at least 1",
            ));
        }
        if self.scheduler.tick_timeout_secs == 0 {
            warnings.push(ConfigWarning::error(
                "scheduler.tick_timeout_secs must be at least 1",
            ));
        }
        if self.workflow.max_wait_secs == 0 {
            warnings.push(ConfigWarning::error(
                "workflow.max_wait_secs must be at least 1",
            ));
        }

        if self.provider.base_url.is_none() {
            warnings.push(ConfigWarning::warning(
                "no provider.base_url configured; scans will fail",
            ));
        }
        if self.channels.is_empty() && !self.channels.dry_run {
            warnings.push(ConfigWarning::warning(
                "no notification channels configured; every send will be recorded as failed",
            ));
        }

        if let Err(e) = self.template_set() {
            warnings.push(ConfigWarning::error(format!("templates: {e}")));
        }

        let seed = &self.seed;
        let profile_ids: HashSet<&str> = seed.profiles.iter().map(|p| p.id.as_str()).collect();
        let exclusion_ids: HashSet<&str> =
            seed.exclusions.iter().map(|l| l.id.as_str()).collect();

        for rule in &seed.rules {
            if let Err(e) = rule.validate() {
                warnings.push(ConfigWarning::error(format!("rule '{}': {e}", rule.name)));
            }
        }
        for rule in &seed.detection_rules {
            if let Err(e) = rule.validate() {
                warnings.push(ConfigWarning::error(format!(
                    "detection rule '{}': {e}",
                    rule.name
                )));
            }
        }
        for rule in &seed.notification_rules {
            if let Err(e) = rule.validate() {
                warnings.push(ConfigWarning::error(format!(
                    "notification rule '{}': {e}",
                    rule.name
                )));
            }
        }

        for job in &seed.jobs {
            if let Err(e) = job.validate() {
                warnings.push(ConfigWarning::error(format!("job '{}': {e}", job.name)));
            }
            if let Some(profile) = &job.scan_profile {
                if !profile_ids.contains(profile.as_str()) {
                    warnings.push(ConfigWarning::warning(format!(
                        "job '{}' references unknown scan profile '{profile}'",
                        job.name
                    )));
                }
            }
            for list in &job.exclusion_lists {
                if !exclusion_ids.contains(list.as_str()) {
                    warnings.push(ConfigWarning::warning(format!(
                        "job '{}' references unknown exclusion list '{list}'",
                        job.name
                    )));
                }
            }
        }

        for wf in &seed.workflows {
            if let Err(e) = wf.validate(self.workflow.max_wait_secs) {
                warnings.push(ConfigWarning::error(format!("workflow '{}': {e}", wf.name)));
            }
        }

        warnings
    }

    pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
        warnings.iter().any(|w| w.level == WarnLevel::Error)
    }
}
