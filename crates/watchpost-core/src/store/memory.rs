use std::collections::BTreeMap;
use std::sync::RwLock;

use uuid::Uuid;

use crate::error::{Result, WatchpostError};
use crate::notify::NotificationRule;
use crate::rules::{AutomationRule, DetectionRule};

use super::{ConfigStore, ExclusionList, ScanProfile};

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// One id-keyed table behind a lock.
pub(crate) struct Collection<T> {
    kind: &'static str,
    items: RwLock<BTreeMap<String, T>>,
}

impl<T: Clone> Collection<T> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            items: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn put(&self, id: String, item: T) -> Result<T> {
        let mut items = self.write()?;
        items.insert(id, item.clone());
        Ok(item)
    }

    pub(crate) fn get(&self, id: &str) -> Result<T> {
        self.read()?
            .get(id)
            .cloned()
            .ok_or_else(|| WatchpostError::not_found(self.kind, id))
    }

    pub(crate) fn list(&self) -> Result<Vec<T>> {
        Ok(self.read()?.values().cloned().collect())
    }

    pub(crate) fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.remove(id).is_some())
    }

    pub(crate) fn update<R>(&self, id: &str, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut items = self.write()?;
        let item = items
            .get_mut(id)
            .ok_or_else(|| WatchpostError::not_found(self.kind, id))?;
        Ok(f(item))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, T>>> {
        self.items
            .read()
            .map_err(|_| WatchpostError::Store(format!("{} lock poisoned", self.kind)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, T>>> {
        self.items
            .write()
            .map_err(|_| WatchpostError::Store(format!("{} lock poisoned", self.kind)))
    }
}

pub(crate) fn assign_id(id: &mut String) {
    if id.trim().is_empty() {
        *id = Uuid::new_v4().to_string();
    }
}

// ---------------------------------------------------------------------------
// MemoryConfigStore
// ---------------------------------------------------------------------------

/// Process-local [`ConfigStore`]; safe for concurrent readers and writers.
pub struct MemoryConfigStore {
    profiles: Collection<ScanProfile>,
    rules: Collection<AutomationRule>,
    detections: Collection<DetectionRule>,
    exclusions: Collection<ExclusionList>,
    notification_rules: Collection<NotificationRule>,
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self {
            profiles: Collection::new("scan profile"),
            rules: Collection::new("automation rule"),
            detections: Collection::new("detection rule"),
            exclusions: Collection::new("exclusion list"),
            notification_rules: Collection::new("notification rule"),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn put_profile(&self, mut profile: ScanProfile) -> Result<ScanProfile> {
        if profile.name.trim().is_empty() {
            return Err(WatchpostError::validation("scan profile name is empty"));
        }
        assign_id(&mut profile.id);
        self.profiles.put(profile.id.clone(), profile)
    }

    fn get_profile(&self, id: &str) -> Result<ScanProfile> {
        self.profiles.get(id)
    }

    fn list_profiles(&self) -> Result<Vec<ScanProfile>> {
        self.profiles.list()
    }

    fn delete_profile(&self, id: &str) -> Result<bool> {
        self.profiles.delete(id)
    }

    fn put_rule(&self, mut rule: AutomationRule) -> Result<AutomationRule> {
        rule.validate()?;
        assign_id(&mut rule.id);
        self.rules.put(rule.id.clone(), rule)
    }

    fn get_rule(&self, id: &str) -> Result<AutomationRule> {
        self.rules.get(id)
    }

    fn list_rules(&self) -> Result<Vec<AutomationRule>> {
        self.rules.list()
    }

    fn delete_rule(&self, id: &str) -> Result<bool> {
        self.rules.delete(id)
    }

    fn record_rule_trigger(&self, id: &str) -> Result<u64> {
        self.rules.update(id, |r| {
            r.triggered_count += 1;
            r.triggered_count
        })
    }

    fn put_detection_rule(&self, mut rule: DetectionRule) -> Result<DetectionRule> {
        rule.validate()?;
        assign_id(&mut rule.id);
        self.detections.put(rule.id.clone(), rule)
    }

    fn list_detection_rules(&self) -> Result<Vec<DetectionRule>> {
        self.detections.list()
    }

    fn delete_detection_rule(&self, id: &str) -> Result<bool> {
        self.detections.delete(id)
    }

    fn record_detection_trigger(&self, id: &str) -> Result<u64> {
        self.detections.update(id, |r| {
            r.triggered_count += 1;
            r.triggered_count
        })
    }

    fn put_exclusion(&self, mut list: ExclusionList) -> Result<ExclusionList> {
        if list.name.trim().is_empty() {
            return Err(WatchpostError::validation("exclusion list name is empty"));
        }
        assign_id(&mut list.id);
        self.exclusions.put(list.id.clone(), list)
    }

    fn get_exclusion(&self, id: &str) -> Result<ExclusionList> {
        self.exclusions.get(id)
    }

    fn list_exclusions(&self) -> Result<Vec<ExclusionList>> {
        self.exclusions.list()
    }

    fn delete_exclusion(&self, id: &str) -> Result<bool> {
        self.exclusions.delete(id)
    }

    fn put_notification_rule(&self, mut rule: NotificationRule) -> Result<NotificationRule> {
        rule.validate()?;
        assign_id(&mut rule.id);
        self.notification_rules.put(rule.id.clone(), rule)
    }

    fn list_notification_rules(&self) -> Result<Vec<NotificationRule>> {
        self.notification_rules.list()
    }

    fn delete_notification_rule(&self, id: &str) -> Result<bool> {
        self.notification_rules.delete(id)
    }

    fn record_notification_trigger(&self, id: &str) -> Result<u64> {
        self.notification_rules.update(id, |r| {
            r.triggered_count += 1;
            r.triggered_count
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Operator};
    use crate::rules::{ActionKind, RuleAction};
    use std::sync::Arc;

    fn low_score_rule() -> AutomationRule {
        AutomationRule::new(
            "low score",
            Condition::new("summary.securityScore", Operator::LessThan, 70),
            RuleAction::new(ActionKind::SendAlert),
        )
    }

    #[test]
    fn put_assigns_id_and_get_returns_copy() {
        let store = MemoryConfigStore::new();
        let stored = store.put_rule(low_score_rule()).unwrap();
        assert!(!stored.id.is_empty());
        assert_eq!(store.get_rule(&stored.id).unwrap(), stored);
    }

    #[test]
    fn put_keeps_caller_supplied_id() {
        let store = MemoryConfigStore::new();
        let mut rule = low_score_rule();
        rule.id = "rule-1".into();
        assert_eq!(store.put_rule(rule).unwrap().id, "rule-1");
    }

    #[test]
    fn put_rejects_invalid_rule() {
        let store = MemoryConfigStore::new();
        let mut rule = low_score_rule();
        rule.condition.field = "nope".into();
        assert!(matches!(
            store.put_rule(rule),
            Err(WatchpostError::Validation(_))
        ));
        assert!(store.list_rules().unwrap().is_empty());
    }

    #[test]
    fn get_unknown_is_not_found() {
        let store = MemoryConfigStore::new();
        assert!(matches!(
            store.get_profile("missing"),
            Err(WatchpostError::NotFound { .. })
        ));
    }

    #[test]
    fn delete_reports_whether_removed() {
        let store = MemoryConfigStore::new();
        let list = store
            .put_exclusion(ExclusionList {
                id: String::new(),
                name: "internal".into(),
                entries: vec!["10.0.0.1".into()],
            })
            .unwrap();
        assert!(store.delete_exclusion(&list.id).unwrap());
        assert!(!store.delete_exclusion(&list.id).unwrap());
    }

    #[test]
    fn concurrent_trigger_increments_are_not_lost() {
        let store = Arc::new(MemoryConfigStore::new());
        let id = store.put_rule(low_score_rule()).unwrap().id;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store.record_rule_trigger(&id).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get_rule(&id).unwrap().triggered_count, 400);
    }

    #[test]
    fn record_trigger_on_missing_rule_is_not_found() {
        let store = MemoryConfigStore::new();
        assert!(store.record_rule_trigger("ghost").is_err());
    }
}
