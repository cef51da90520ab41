use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, WatchpostError};
use crate::scheduler::ScheduledJob;
use crate::store::ConfigStore;
use crate::types::ScanResult;

use super::actions::{ActionContext, ActionRegistry};
use super::{ActionKind, AutomationRule, RuleAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    Automation,
    Detection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FiringOutcome {
    Succeeded { output: Value },
    Failed { error: String },
    NotSupported { action: String },
}

impl FiringOutcome {
    fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(output) => FiringOutcome::Succeeded { output },
            Err(WatchpostError::ActionNotSupported(action)) => FiringOutcome::NotSupported { action },
            Err(e) => FiringOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FiringOutcome::Succeeded { .. })
    }
}

/// One rule that matched a scan result, and what its action did.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFiring {
    pub rule_id: String,
    pub rule_name: String,
    pub source: RuleSource,
    pub action: ActionKind,
    pub target: String,
    pub outcome: FiringOutcome,
}

/// Pure condition evaluation plus action dispatch through the registry.
pub struct RuleEngine {
    store: Arc<dyn ConfigStore>,
    actions: Arc<ActionRegistry>,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn ConfigStore>, actions: Arc<ActionRegistry>) -> Self {
        Self { store, actions }
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    /// Side-effect free; disabled rules never match.
    pub fn evaluate(rule: &AutomationRule, result: &ScanResult) -> bool {
        rule.enabled && rule.condition.evaluate(result)
    }

    /// Evaluate the job's automation rules, then every enabled detection
    /// rule, against `result`. Each matching rule has its trigger count
    /// bumped and its action dispatched exactly once; a failing action never
    /// stops the next rule. A rule id listed twice on the job still fires
    /// once.
    pub async fn check_triggers(&self, job: &ScheduledJob, result: &ScanResult) -> Vec<RuleFiring> {
        let mut firings = Vec::new();
        let mut seen = HashSet::new();

        for rule_id in &job.rule_ids {
            if !seen.insert(rule_id.as_str()) {
                continue;
            }
            let rule = match self.store.get_rule(rule_id) {
                Ok(rule) => rule,
                Err(e) => {
                    warn!(job_id = %job.id, rule_id = %rule_id, error = %e, "job references missing rule");
                    continue;
                }
            };
            if !Self::evaluate(&rule, result) {
                continue;
            }
            if let Err(e) = self.store.record_rule_trigger(&rule.id) {
                warn!(rule_id = %rule.id, error = %e, "could not bump rule counter");
            }
            let ctx = ActionContext::for_rule(&rule.id, &rule.name, Some(&job.id), result);
            let outcome = FiringOutcome::from_result(self.dispatch_action(&rule.action, &ctx).await);
            log_outcome(&rule.id, &result.target, &outcome);
            firings.push(RuleFiring {
                rule_id: rule.id,
                rule_name: rule.name,
                source: RuleSource::Automation,
                action: rule.action.kind,
                target: result.target.clone(),
                outcome,
            });
        }

        let detections = match self.store.list_detection_rules() {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "could not load detection rules");
                Vec::new()
            }
        };
        for rule in detections {
            if !rule.enabled || !rule.condition.evaluate(result) {
                continue;
            }
            if let Err(e) = self.store.record_detection_trigger(&rule.id) {
                warn!(rule_id = %rule.id, error = %e, "could not bump detection counter");
            }
            let action = rule.alert_action();
            let mut ctx = ActionContext::for_rule(&rule.id, &rule.name, Some(&job.id), result);
            ctx.data
                .insert("category".into(), Value::from(rule.category.clone()));
            let outcome = FiringOutcome::from_result(self.dispatch_action(&action, &ctx).await);
            log_outcome(&rule.id, &result.target, &outcome);
            firings.push(RuleFiring {
                rule_id: rule.id,
                rule_name: rule.name,
                source: RuleSource::Detection,
                action: action.kind,
                target: result.target.clone(),
                outcome,
            });
        }

        firings
    }

    pub async fn dispatch_action(&self, action: &RuleAction, ctx: &ActionContext) -> Result<Value> {
        self.actions.dispatch(action, ctx).await
    }
}

fn log_outcome(rule_id: &str, target: &str, outcome: &FiringOutcome) {
    match outcome {
        FiringOutcome::Succeeded { .. } => debug!(rule_id, target, "rule fired"),
        FiringOutcome::Failed { error } => warn!(rule_id, target, error = %error, "rule action failed"),
        FiringOutcome::NotSupported { action } => {
            warn!(rule_id, target, action = %action, "rule fired with unsupported action")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Operator};
    use crate::notify::Channel;
    use crate::provider::testing::ScriptedProvider;
    use crate::rules::actions::testing::harness;
    use crate::rules::DetectionRule;
    use crate::scheduler::{JobSpec, ScheduledJob};
    use crate::types::fixtures::result_with_score;
    use crate::types::RiskLevel;

    fn low_score(kind: ActionKind) -> AutomationRule {
        AutomationRule::new(
            "low score",
            Condition::new("summary.securityScore", Operator::LessThan, 70),
            RuleAction::new(kind),
        )
    }

    fn job_with(rule_ids: Vec<String>) -> ScheduledJob {
        let spec = JobSpec::new("nightly", vec!["a.com".into()], "0 */6 * * *");
        let mut job = ScheduledJob::from_spec("j1".into(), spec, chrono::Utc::now());
        job.rule_ids = rule_ids;
        job
    }

    #[test]
    fn evaluate_is_pure_and_repeatable() {
        let rule = low_score(ActionKind::SendAlert);
        let result = result_with_score("a.com", 60);
        let before = result.clone();
        assert!(RuleEngine::evaluate(&rule, &result));
        assert!(RuleEngine::evaluate(&rule, &result));
        assert_eq!(result, before);
        assert!(!RuleEngine::evaluate(&rule, &result_with_score("b.com", 85)));
    }

    #[test]
    fn disabled_rule_never_matches() {
        let mut rule = low_score(ActionKind::SendAlert);
        rule.enabled = false;
        assert!(!RuleEngine::evaluate(&rule, &result_with_score("a.com", 10)));
    }

    #[tokio::test]
    async fn matching_rule_dispatches_once_and_counts() {
        let h = harness(ScriptedProvider::new());
        let rule = h.store.put_rule(low_score(ActionKind::SendAlert)).unwrap();
        let engine = RuleEngine::new(h.store.clone(), Arc::new(h.registry));

        let firings = engine
            .check_triggers(&job_with(vec![rule.id.clone()]), &result_with_score("a.com", 60))
            .await;
        assert_eq!(firings.len(), 1);
        assert!(firings[0].outcome.is_success());
        assert_eq!(h.email.sent().len(), 1);
        assert_eq!(h.store.get_rule(&rule.id).unwrap().triggered_count, 1);
    }

    #[tokio::test]
    async fn unsupported_action_still_counts_trigger() {
        let h = harness(ScriptedProvider::new());
        let rule = h
            .store
            .put_rule(low_score(ActionKind::Unknown("reboot".into())))
            .unwrap();
        let engine = RuleEngine::new(h.store.clone(), Arc::new(h.registry));

        let firings = engine
            .check_triggers(&job_with(vec![rule.id.clone()]), &result_with_score("a.com", 60))
            .await;
        assert_eq!(
            firings[0].outcome,
            FiringOutcome::NotSupported {
                action: "reboot".into()
            }
        );
        assert_eq!(h.store.get_rule(&rule.id).unwrap().triggered_count, 1);
    }

    #[tokio::test]
    async fn failing_action_does_not_stop_other_rules() {
        let h = harness(ScriptedProvider::new());
        // block_ips without ips fails
        let failing = h.store.put_rule(low_score(ActionKind::BlockIps)).unwrap();
        let alert = h.store.put_rule(low_score(ActionKind::SendAlert)).unwrap();
        let engine = RuleEngine::new(h.store.clone(), Arc::new(h.registry));

        let firings = engine
            .check_triggers(
                &job_with(vec![failing.id.clone(), alert.id.clone()]),
                &result_with_score("a.com", 60),
            )
            .await;
        assert_eq!(firings.len(), 2);
        assert!(!firings[0].outcome.is_success());
        assert!(firings[1].outcome.is_success());
    }

    #[tokio::test]
    async fn missing_and_disabled_rules_are_skipped() {
        let h = harness(ScriptedProvider::new());
        let mut disabled = low_score(ActionKind::SendAlert);
        disabled.enabled = false;
        let disabled = h.store.put_rule(disabled).unwrap();
        let engine = RuleEngine::new(h.store.clone(), Arc::new(h.registry));

        let firings = engine
            .check_triggers(
                &job_with(vec!["ghost".into(), disabled.id.clone()]),
                &result_with_score("a.com", 10),
            )
            .await;
        assert!(firings.is_empty());
        assert_eq!(h.store.get_rule(&disabled.id).unwrap().triggered_count, 0);
    }

    #[tokio::test]
    async fn repeated_rule_id_fires_once() {
        let h = harness(ScriptedProvider::new());
        let rule = h.store.put_rule(low_score(ActionKind::SendAlert)).unwrap();
        let engine = RuleEngine::new(h.store.clone(), Arc::new(h.registry));

        let firings = engine
            .check_triggers(
                &job_with(vec![rule.id.clone(), rule.id.clone()]),
                &result_with_score("a.com", 60),
            )
            .await;
        assert_eq!(firings.len(), 1);
        assert_eq!(h.email.sent().len(), 1);
        assert_eq!(h.store.get_rule(&rule.id).unwrap().triggered_count, 1);
    }

    #[tokio::test]
    async fn detection_rules_raise_categorized_alerts() {
        let h = harness(ScriptedProvider::new());
        let detection = h
            .store
            .put_detection_rule(DetectionRule {
                id: String::new(),
                name: "weak posture".into(),
                category: "posture".into(),
                severity: RiskLevel::High,
                condition: Condition::new("summary.securityScore", Operator::LessThan, 50),
                channels: vec![Channel::Email],
                enabled: true,
                triggered_count: 0,
            })
            .unwrap();
        let engine = RuleEngine::new(h.store.clone(), Arc::new(h.registry));

        let firings = engine
            .check_triggers(&job_with(vec![]), &result_with_score("a.com", 40))
            .await;
        assert_eq!(firings.len(), 1);
        assert_eq!(firings[0].source, RuleSource::Detection);
        assert_eq!(firings[0].rule_id, detection.id);
        let sent = h.email.sent();
        assert_eq!(sent[0].subject.as_deref(), Some("[high] Alert for a.com"));
        assert_eq!(sent[0].data["category"], "posture");
    }
}
