//! Wires every component from a [`Config`].

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, SeedConfig};
use crate::controls::{self, SecurityControls};
use crate::error::Result;
use crate::events::EventBus;
use crate::history::{self, HistoryStore};
use crate::notify::transport::{self, Transport};
use crate::notify::NotificationDispatcher;
use crate::provider::{self, ScanProvider};
use crate::rules::{ActionRegistry, RuleEngine};
use crate::scheduler::engine::SchedulerDeps;
use crate::scheduler::{MemoryJobRepository, Scheduler};
use crate::store::{ConfigStore, MemoryConfigStore};
use crate::workflow::{MemoryWorkflowRepository, WorkflowDeps, WorkflowEngine};

/// The outward-facing collaborators. Swapped out in tests and dry runs.
pub struct EngineParts {
    pub provider: Arc<dyn ScanProvider>,
    pub controls: Arc<dyn SecurityControls>,
    pub transports: Vec<Arc<dyn Transport>>,
    pub history: Arc<dyn HistoryStore>,
}

impl EngineParts {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self {
            provider: provider::from_config(&cfg.provider)?,
            controls: controls::from_config(&cfg.controls)?,
            transports: transport::from_config(&cfg.channels)?,
            history: history::open(&cfg.history)?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedReport {
    pub profiles: usize,
    pub exclusions: usize,
    pub rules: usize,
    pub detection_rules: usize,
    pub notification_rules: usize,
    pub jobs: usize,
    pub workflows: usize,
}

#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn ConfigStore>,
    pub scheduler: Scheduler,
    pub workflows: WorkflowEngine,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub rules: Arc<RuleEngine>,
    pub history: Arc<dyn HistoryStore>,
    pub events: EventBus,
}

impl Engine {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::build(cfg, EngineParts::from_config(cfg)?)
    }

    pub fn build(cfg: &Config, parts: EngineParts) -> Result<Self> {
        let events = EventBus::default();
        let store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            cfg.template_set()?,
            parts.transports,
            store.clone(),
            parts.history.clone(),
            events.clone(),
        ));
        let actions = Arc::new(ActionRegistry::with_defaults(
            dispatcher.clone(),
            parts.controls,
            parts.provider.clone(),
        ));
        let rules = Arc::new(RuleEngine::new(store.clone(), actions.clone()));

        let scheduler = Scheduler::new(
            cfg.scheduler.clone(),
            SchedulerDeps {
                jobs: Arc::new(MemoryJobRepository::default()),
                store: store.clone(),
                provider: parts.provider.clone(),
                rules: rules.clone(),
                dispatcher: dispatcher.clone(),
                history: parts.history.clone(),
                events: events.clone(),
            },
        );
        let workflows = WorkflowEngine::new(
            cfg.workflow.clone(),
            WorkflowDeps {
                workflows: Arc::new(MemoryWorkflowRepository::default()),
                provider: parts.provider,
                dispatcher: dispatcher.clone(),
                actions,
                history: parts.history.clone(),
                events: events.clone(),
            },
        );

        Ok(Self {
            store,
            scheduler,
            workflows,
            dispatcher,
            rules,
            history: parts.history,
            events,
        })
    }

    /// Load seed entities. Configuration entities go first so jobs can
    /// reference profiles, exclusion lists and rules by id.
    pub async fn seed(&self, seed: &SeedConfig) -> Result<SeedReport> {
        let mut report = SeedReport::default();
        for profile in &seed.profiles {
            self.store.put_profile(profile.clone())?;
            report.profiles += 1;
        }
        for list in &seed.exclusions {
            self.store.put_exclusion(list.clone())?;
            report.exclusions += 1;
        }
        for rule in &seed.rules {
            self.store.put_rule(rule.clone())?;
            report.rules += 1;
        }
        for rule in &seed.detection_rules {
            self.store.put_detection_rule(rule.clone())?;
            report.detection_rules += 1;
        }
        for rule in &seed.notification_rules {
            self.store.put_notification_rule(rule.clone())?;
            report.notification_rules += 1;
        }
        for job in &seed.jobs {
            self.scheduler.create_job(job.clone()).await?;
            report.jobs += 1;
        }
        for wf in &seed.workflows {
            self.workflows.create_workflow(wf.clone())?;
            report.workflows += 1;
        }
        info!(
            jobs = report.jobs,
            workflows = report.workflows,
            rules = report.rules,
            "seed loaded"
        );
        Ok(report)
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::RecordingControls;
    use crate::history::MemoryHistory;
    use crate::notify::transport::RecordingTransport;
    use crate::notify::Channel;
    use crate::provider::testing::ScriptedProvider;

    fn parts(provider: ScriptedProvider) -> (EngineParts, Arc<RecordingTransport>) {
        let email = Arc::new(RecordingTransport::new(Channel::Email));
        (
            EngineParts {
                provider: Arc::new(provider),
                controls: Arc::new(RecordingControls::new()),
                transports: vec![email.clone() as Arc<dyn Transport>],
                history: Arc::new(MemoryHistory::default()),
            },
            email,
        )
    }

    const SEEDED: &str = r#"
seed:
  profiles:
    - id: quick
      name: Quick
      options: { depth: 1 }
  exclusions:
    - id: internal
      name: internal hosts
      entries: ["*.corp.example"]
  rules:
    - id: low-score
      name: low score
      condition: { field: summary.securityScore, operator: less_than, threshold: 70 }
      action: { type: send_alert }
  jobs:
    - name: nightly
      targets: [a.com, b.com, db.corp.example]
      cronExpression: "0 */6 * * *"
      scanProfile: quick
      exclusionLists: [internal]
      ruleIds: [low-score]
  workflows:
    - name: triage
      steps:
        - type: scan
          config: { target: "{{target}}" }
"#;

    #[tokio::test]
    async fn seed_loads_everything_and_jobs_run() {
        let cfg: Config = serde_yaml::from_str(SEEDED).unwrap();
        let (parts, email) = parts(ScriptedProvider::new().score("a.com", 60).score("b.com", 85));
        let engine = Engine::build(&cfg, parts).unwrap();

        let report = engine.seed(&cfg.seed).await.unwrap();
        assert_eq!(report.profiles, 1);
        assert_eq!(report.exclusions, 1);
        assert_eq!(report.rules, 1);
        assert_eq!(report.jobs, 1);
        assert_eq!(report.workflows, 1);
        assert_eq!(engine.scheduler.active_timers(), 1);

        let job = engine.scheduler.list_jobs().unwrap().remove(0);
        let run = engine.scheduler.trigger_now(&job.id).await.unwrap().unwrap();
        assert_eq!(run.results.len(), 3);
        assert!(run.results[2].excluded_by.is_some());
        assert_eq!(email.sent().len(), 1);
        assert_eq!(engine.store.get_rule("low-score").unwrap().triggered_count, 1);
        engine.shutdown().await;
        assert_eq!(engine.scheduler.active_timers(), 0);
    }

    #[test]
    fn default_config_builds() {
        let cfg = Config::default();
        let engine = Engine::from_config(&cfg).unwrap();
        assert!(engine.scheduler.list_jobs().unwrap().is_empty());
        assert!(engine.dispatcher.templates().get(Channel::Slack, "alert").is_ok());
    }
}
