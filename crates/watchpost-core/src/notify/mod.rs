//! Templated, multi-channel notification delivery.

pub mod dispatcher;
pub mod template;
pub mod transport;

pub use dispatcher::{NotificationDispatcher, NotificationStats, TriggerDispatch};
pub use template::{Template, TemplateSet};
pub use transport::{RenderedMessage, Transport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::condition::Condition;
use crate::error::{Result, WatchpostError};

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Slack,
    Webhook,
    Sms,
}

impl Channel {
    pub fn all() -> &'static [Channel] {
        &[Channel::Email, Channel::Slack, Channel::Webhook, Channel::Sms]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Slack => "slack",
            Channel::Webhook => "webhook",
            Channel::Sms => "sms",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = WatchpostError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "email" => Ok(Channel::Email),
            "slack" => Ok(Channel::Slack),
            "webhook" => Ok(Channel::Webhook),
            "sms" => Ok(Channel::Sms),
            _ => Err(WatchpostError::validation(format!("unknown channel '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Notification (audit record)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub channel: Channel,
    pub payload: Value,
    pub status: NotificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// SendOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendOptions {
    /// Channel-specific addressees (email addresses, phone numbers).
    /// Empty means the channel's configured defaults.
    #[serde(default)]
    pub recipients: Vec<String>,
}

impl SendOptions {
    pub fn to(recipients: Vec<String>) -> Self {
        Self { recipients }
    }
}

// ---------------------------------------------------------------------------
// NotificationRule
// ---------------------------------------------------------------------------

fn default_enabled() -> bool {
    true
}

/// Triggers the scheduler fires with a scan payload.
pub const SCAN_TRIGGERS: &[&str] = &["scan_completed", "scan_failed", "critical_finding"];

/// Condition-gated fan-out from a trigger type to one or more channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub trigger: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub channels: Vec<Channel>,
    /// Template type to send; defaults to the trigger name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub triggered_count: u64,
}

impl NotificationRule {
    pub fn validate(&self) -> Result<()> {
        if self.trigger.trim().is_empty() {
            return Err(WatchpostError::validation("notification rule has no trigger"));
        }
        if self.channels.is_empty() {
            return Err(WatchpostError::validation(format!(
                "notification rule for '{}' has no channels",
                self.trigger
            )));
        }
        let scan_trigger = SCAN_TRIGGERS.contains(&self.trigger.as_str());
        for c in &self.conditions {
            if scan_trigger {
                c.validate_for_scan_payload()?;
            } else {
                c.validate_operator()?;
            }
        }
        Ok(())
    }

    pub fn template_type(&self) -> &str {
        self.notification_type.as_deref().unwrap_or(&self.trigger)
    }
}
