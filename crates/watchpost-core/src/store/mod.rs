//! Configuration store: scan profiles, automation and detection rules,
//! exclusion lists and notification rules.
//!
//! The engine depends on the [`ConfigStore`] trait only. The store owns the
//! rule definitions; the engine reads them by id and only ever bumps their
//! trigger counters.

pub mod memory;

pub use memory::MemoryConfigStore;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::notify::NotificationRule;
use crate::rules::{AutomationRule, DetectionRule};
use crate::types::ScanOptions;

// ---------------------------------------------------------------------------
// ScanProfile
// ---------------------------------------------------------------------------

/// Named, reusable provider options a job can reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProfile {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub options: ScanOptions,
}

// ---------------------------------------------------------------------------
// ExclusionList
// ---------------------------------------------------------------------------

/// Targets that must never be scanned. Entries match exactly
/// (case-insensitive) or, with a `*.` prefix, any subdomain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionList {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub entries: Vec<String>,
}

impl ExclusionList {
    pub fn matches(&self, target: &str) -> bool {
        let target = target.trim().to_ascii_lowercase();
        self.entries.iter().any(|entry| {
            let entry = entry.trim().to_ascii_lowercase();
            match entry.strip_prefix("*.") {
                Some(suffix) => target.ends_with(&format!(".{suffix}")),
                None => entry == target,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// ConfigStore
// ---------------------------------------------------------------------------

/// Repository for everything the engine is configured with.
///
/// `put_*` assigns an id when the entity's id is empty, validates, and
/// returns the stored copy. `get_*` fails with `NotFound`. `delete_*`
/// returns whether something was removed.
pub trait ConfigStore: Send + Sync {
    fn put_profile(&self, profile: ScanProfile) -> Result<ScanProfile>;
    fn get_profile(&self, id: &str) -> Result<ScanProfile>;
    fn list_profiles(&self) -> Result<Vec<ScanProfile>>;
    fn delete_profile(&self, id: &str) -> Result<bool>;

    fn put_rule(&self, rule: AutomationRule) -> Result<AutomationRule>;
    fn get_rule(&self, id: &str) -> Result<AutomationRule>;
    fn list_rules(&self) -> Result<Vec<AutomationRule>>;
    fn delete_rule(&self, id: &str) -> Result<bool>;
    /// Returns the new trigger count.
    fn record_rule_trigger(&self, id: &str) -> Result<u64>;

    fn put_detection_rule(&self, rule: DetectionRule) -> Result<DetectionRule>;
    fn list_detection_rules(&self) -> Result<Vec<DetectionRule>>;
    fn delete_detection_rule(&self, id: &str) -> Result<bool>;
    fn record_detection_trigger(&self, id: &str) -> Result<u64>;

    fn put_exclusion(&self, list: ExclusionList) -> Result<ExclusionList>;
    fn get_exclusion(&self, id: &str) -> Result<ExclusionList>;
    fn list_exclusions(&self) -> Result<Vec<ExclusionList>>;
    fn delete_exclusion(&self, id: &str) -> Result<bool>;

    fn put_notification_rule(&self, rule: NotificationRule) -> Result<NotificationRule>;
    fn list_notification_rules(&self) -> Result<Vec<NotificationRule>>;
    fn delete_notification_rule(&self, id: &str) -> Result<bool>;
    fn record_notification_trigger(&self, id: &str) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> ExclusionList {
        ExclusionList {
            id: "x".into(),
            name: "internal".into(),
            entries: entries.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn exclusion_matches_exact_case_insensitively() {
        let l = list(&["Admin.Example.com"]);
        assert!(l.matches("admin.example.com"));
        assert!(!l.matches("www.example.com"));
    }

    #[test]
    fn exclusion_wildcard_matches_subdomains_only() {
        let l = list(&["*.corp.local"]);
        assert!(l.matches("db.corp.local"));
        assert!(l.matches("a.b.corp.local"));
        assert!(!l.matches("corp.local"));
        assert!(!l.matches("notcorp.local"));
    }
}
