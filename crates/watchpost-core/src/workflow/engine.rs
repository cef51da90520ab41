use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WorkflowConfig;
use crate::error::{Result, WatchpostError};
use crate::events::{EngineEvent, EventBus};
use crate::history::HistoryStore;
use crate::notify::template::render_value;
use crate::notify::{NotificationDispatcher, NotificationStatus, SendOptions};
use crate::provider::ScanProvider;
use crate::rules::{ActionContext, ActionRegistry, RuleAction};
use crate::types::ScanResult;

use super::repo::WorkflowRepository;
use super::{
    parse_config, ConditionStepConfig, ExecutionStatus, NotifyStepConfig, ScanStepConfig, StepRecord,
    StepType, WaitStepConfig, Workflow, WorkflowExecution, WorkflowSpec, WorkflowStep,
};

#[derive(Clone)]
pub struct WorkflowDeps {
    pub workflows: Arc<dyn WorkflowRepository>,
    pub provider: Arc<dyn ScanProvider>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub actions: Arc<ActionRegistry>,
    pub history: Arc<dyn HistoryStore>,
    pub events: EventBus,
}

struct Inner {
    cfg: WorkflowConfig,
    deps: WorkflowDeps,
    /// Cancelled when the workflow is deleted; shared by its executions.
    cancels: Mutex<HashMap<String, CancellationToken>>,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<Inner>,
}

impl WorkflowEngine {
    pub fn new(cfg: WorkflowConfig, deps: WorkflowDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                deps,
                cancels: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn create_workflow(&self, spec: WorkflowSpec) -> Result<Workflow> {
        spec.validate(self.inner.cfg.max_wait_secs)?;
        let workflow = Workflow::from_spec(Uuid::new_v4().to_string(), spec, Utc::now());
        let workflow = self.inner.deps.workflows.insert(workflow)?;
        info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            steps = workflow.steps.len(),
            "workflow created"
        );
        Ok(workflow)
    }

    pub fn get_workflow(&self, id: &str) -> Result<Workflow> {
        self.inner.deps.workflows.get(id)
    }

    pub fn list_workflows(&self) -> Result<Vec<Workflow>> {
        self.inner.deps.workflows.list()
    }

    /// Remove the workflow and interrupt any of its executions sitting in a
    /// `wait` step. Steps already recorded stay recorded.
    pub fn delete_workflow(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut cancels = self.cancels()?;
            let removed = self.inner.deps.workflows.remove(id)?;
            if let Some(token) = cancels.remove(id) {
                token.cancel();
            }
            removed
        };
        if removed {
            info!(workflow_id = %id, "workflow deleted");
        }
        Ok(removed)
    }

    /// Newest first.
    pub fn executions(&self, workflow_id: Option<&str>, limit: usize) -> Result<Vec<WorkflowExecution>> {
        self.inner.deps.history.executions(workflow_id, limit)
    }

    /// Run to a terminal state and return the execution.
    pub async fn execute(&self, workflow_id: &str, initial: Map<String, Value>) -> Result<WorkflowExecution> {
        let workflow = self.begin(workflow_id)?;
        Ok(self.run(workflow, Uuid::new_v4().to_string(), initial).await)
    }

    /// Spawn an execution. The id is known immediately; the handle resolves
    /// with the terminal execution.
    pub fn start(
        &self,
        workflow_id: &str,
        initial: Map<String, Value>,
    ) -> Result<(String, JoinHandle<WorkflowExecution>)> {
        let workflow = self.begin(workflow_id)?;
        let execution_id = Uuid::new_v4().to_string();
        let engine = self.clone();
        let id = execution_id.clone();
        let handle = tokio::spawn(async move { engine.run(workflow, id, initial).await });
        Ok((execution_id, handle))
    }

    /// Execute every enabled workflow listening for `event`, in turn.
    pub async fn trigger_event(&self, event: &str, data: Map<String, Value>) -> Result<Vec<WorkflowExecution>> {
        let listeners: Vec<Workflow> = self
            .inner
            .deps
            .workflows
            .list()?
            .into_iter()
            .filter(|wf| wf.enabled && wf.listens_for(event))
            .collect();
        let mut executions = Vec::with_capacity(listeners.len());
        for wf in listeners {
            match self.execute(&wf.id, data.clone()).await {
                Ok(execution) => executions.push(execution),
                Err(e) => warn!(workflow_id = %wf.id, event, error = %e, "event workflow not started"),
            }
        }
        debug!(event, executions = executions.len(), "event dispatched to workflows");
        Ok(executions)
    }

    fn cancels(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CancellationToken>>> {
        self.inner
            .cancels
            .lock()
            .map_err(|_| WatchpostError::Store("workflow cancel lock poisoned".into()))
    }

    /// Check the workflow can run, count the execution and hand out its
    /// cancel token. Holds the cancel map throughout so a concurrent delete
    /// either lands first (not found) or cancels the token handed out here.
    fn begin(&self, workflow_id: &str) -> Result<(Workflow, CancellationToken)> {
        let mut cancels = self.cancels()?;
        let workflow = self.inner.deps.workflows.get(workflow_id)?;
        if !workflow.enabled {
            return Err(WatchpostError::validation(format!(
                "workflow '{}' is disabled",
                workflow.name
            )));
        }
        let workflow = self.inner.deps.workflows.record_execution(workflow_id)?;
        let token = cancels.entry(workflow_id.to_string()).or_default().clone();
        Ok((workflow, token))
    }

    async fn run(
        &self,
        (workflow, cancel): (Workflow, CancellationToken),
        execution_id: String,
        initial: Map<String, Value>,
    ) -> WorkflowExecution {
        let mut execution = WorkflowExecution {
            execution_id,
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            status: ExecutionStatus::Running,
            context: initial,
            steps_completed: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            failed_at: None,
            error: None,
        };
        info!(
            workflow_id = %workflow.id,
            execution_id = %execution.execution_id,
            "workflow execution started"
        );

        for (index, step) in workflow.steps.iter().enumerate() {
            let started_at = Utc::now();
            let outcome = self.run_step(step, &execution, &cancel).await;
            let finished_at = Utc::now();
            match outcome {
                Ok(output) => {
                    merge_output(&mut execution.context, &output);
                    debug!(execution_id = %execution.execution_id, index, step = %step.step_type, "step completed");
                    execution.steps_completed.push(StepRecord {
                        index,
                        step_type: step.step_type,
                        success: true,
                        output: Some(output),
                        error: None,
                        started_at,
                        finished_at,
                    });
                }
                Err(e) => {
                    warn!(
                        execution_id = %execution.execution_id,
                        index,
                        step = %step.step_type,
                        error = %e,
                        "workflow step failed"
                    );
                    execution.steps_completed.push(StepRecord {
                        index,
                        step_type: step.step_type,
                        success: false,
                        output: None,
                        error: Some(e.to_string()),
                        started_at,
                        finished_at,
                    });
                    execution.status = ExecutionStatus::Failed;
                    execution.failed_at = Some(finished_at);
                    execution.error = Some(format!("step {index} ({}) failed: {e}", step.step_type));
                    break;
                }
            }
        }
        if execution.status == ExecutionStatus::Running {
            execution.status = ExecutionStatus::Completed;
            execution.completed_at = Some(Utc::now());
        }

        if let Err(e) = self.inner.deps.history.append_execution(&execution) {
            warn!(execution_id = %execution.execution_id, error = %e, "failed to record execution");
        }
        self.inner.deps.events.publish(EngineEvent::WorkflowFinished {
            workflow_id: execution.workflow_id.clone(),
            execution_id: execution.execution_id.clone(),
            status: execution.status,
        });
        info!(
            workflow_id = %execution.workflow_id,
            execution_id = %execution.execution_id,
            status = ?execution.status,
            steps = execution.steps_completed.len(),
            "workflow execution finished"
        );
        execution
    }

    async fn run_step(
        &self,
        step: &WorkflowStep,
        execution: &WorkflowExecution,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let deps = &self.inner.deps;
        let context = &execution.context;
        let config = render_value(&step.config, context);

        match step.step_type {
            StepType::Scan => {
                let cfg: ScanStepConfig = parse_config(step.step_type, &config)?;
                let result = deps.provider.run_scan(&cfg.target, &cfg.options).await?;
                let mut out = result.template_data();
                out.insert("scan_result".into(), serde_json::to_value(&result)?);
                Ok(Value::Object(out))
            }
            StepType::Notify => {
                let cfg: NotifyStepConfig = parse_config(step.step_type, &config)?;
                let mut data = context.clone();
                data.extend(cfg.data);
                let notification = deps
                    .dispatcher
                    .send(
                        &cfg.notification_type,
                        cfg.channel,
                        &Value::Object(data),
                        &SendOptions::to(cfg.recipients),
                    )
                    .await?;
                if notification.status == NotificationStatus::Failed {
                    return Err(WatchpostError::Transport {
                        channel: cfg.channel.as_str().to_string(),
                        message: notification.error.unwrap_or_default(),
                    });
                }
                Ok(json!({
                    "notification_id": notification.id,
                    "notification_status": notification.status,
                }))
            }
            StepType::Wait => {
                let cfg: WaitStepConfig = parse_config(step.step_type, &config)?;
                let duration = cfg.duration(self.inner.cfg.max_wait_secs)?;
                tokio::select! {
                    _ = cancel.cancelled() => Err(WatchpostError::Cancelled(format!(
                        "workflow {} deleted during wait",
                        execution.workflow_id
                    ))),
                    _ = tokio::time::sleep(duration) => {
                        Ok(json!({ "waited_ms": duration.as_millis() as u64 }))
                    }
                }
            }
            StepType::Condition => {
                let cfg: ConditionStepConfig = parse_config(step.step_type, &config)?;
                let holds = cfg.condition.evaluate(context);
                if !holds && cfg.halt_on_false {
                    return Err(WatchpostError::Action {
                        action: "condition".into(),
                        message: format!(
                            "'{} {} {}' is false",
                            cfg.condition.field, cfg.condition.operator, cfg.condition.threshold
                        ),
                    });
                }
                let mut out = Map::new();
                out.insert(cfg.output_key, Value::Bool(holds));
                Ok(Value::Object(out))
            }
            StepType::Action => {
                // The registry renders the action config itself.
                let action: RuleAction = parse_config(step.step_type, &step.config)?;
                let mut ctx = ActionContext::for_workflow(&execution.execution_id, context);
                ctx.result = context
                    .get("scan_result")
                    .and_then(|v| serde_json::from_value::<ScanResult>(v.clone()).ok());
                deps.actions.dispatch(&action, &ctx).await
            }
        }
    }
}

/// Object outputs merge key by key (later keys win); anything else lands
/// under `output`.
fn merge_output(context: &mut Map<String, Value>, output: &Value) {
    match output {
        Value::Object(fields) => {
            for (k, v) in fields {
                context.insert(k.clone(), v.clone());
            }
        }
        Value::Null => {}
        other => {
            context.insert("output".into(), other.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::{ControlCall, RecordingControls};
    use crate::history::MemoryHistory;
    use crate::notify::transport::{RecordingTransport, Transport};
    use crate::notify::{Channel, TemplateSet};
    use crate::provider::testing::ScriptedProvider;
    use crate::store::MemoryConfigStore;
    use crate::workflow::{MemoryWorkflowRepository, WorkflowTrigger};
    use std::time::Duration;

    struct Fixture {
        engine: WorkflowEngine,
        provider: Arc<ScriptedProvider>,
        slack: Arc<RecordingTransport>,
        controls: Arc<RecordingControls>,
        history: Arc<MemoryHistory>,
    }

    fn fixture_with(provider: ScriptedProvider, slack: RecordingTransport) -> Fixture {
        fixture_on(Arc::new(MemoryWorkflowRepository::default()), provider, slack)
    }

    fn fixture_on(
        workflows: Arc<dyn WorkflowRepository>,
        provider: ScriptedProvider,
        slack: RecordingTransport,
    ) -> Fixture {
        let provider = Arc::new(provider);
        let slack = Arc::new(slack);
        let controls = Arc::new(RecordingControls::new());
        let history = Arc::new(MemoryHistory::default());
        let events = EventBus::default();
        let dispatcher = Arc::new(NotificationDispatcher::new(
            TemplateSet::with_defaults(),
            vec![slack.clone() as Arc<dyn Transport>],
            Arc::new(MemoryConfigStore::new()),
            history.clone(),
            events.clone(),
        ));
        let actions = Arc::new(ActionRegistry::with_defaults(
            dispatcher.clone(),
            controls.clone(),
            provider.clone(),
        ));
        let engine = WorkflowEngine::new(
            WorkflowConfig::default(),
            WorkflowDeps {
                workflows,
                provider: provider.clone(),
                dispatcher,
                actions,
                history: history.clone(),
                events,
            },
        );
        Fixture {
            engine,
            provider,
            slack,
            controls,
            history,
        }
    }

    fn fixture(provider: ScriptedProvider) -> Fixture {
        fixture_with(provider, RecordingTransport::new(Channel::Slack))
    }

    fn spec(steps: Value) -> WorkflowSpec {
        serde_json::from_value(json!({ "name": "triage", "steps": steps })).unwrap()
    }

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn steps_run_in_order_and_merge_context() {
        let f = fixture(ScriptedProvider::new().score("a.com", 55));
        let wf = f
            .engine
            .create_workflow(spec(json!([
                { "type": "scan", "config": { "target": "{{target}}" } },
                { "type": "condition", "config": {
                    "field": "security_score", "operator": "less_than", "threshold": 70,
                    "outputKey": "needs_attention"
                } },
                { "type": "notify", "config": { "type": "alert", "channel": "slack", "data": {
                    "severity": "high", "rule_name": "triage"
                } } }
            ])))
            .unwrap();

        let exec = f
            .engine
            .execute(&wf.id, ctx(json!({ "target": "a.com" })))
            .await
            .unwrap();
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.steps_completed.len(), 3);
        assert_eq!(exec.context["security_score"], 55);
        assert_eq!(exec.context["needs_attention"], true);
        assert_eq!(exec.context["notification_status"], "sent");
        assert!(exec.completed_at.is_some());

        let sent = f.slack.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("a.com"));
        assert_eq!(f.engine.get_workflow(&wf.id).unwrap().execution_count, 1);
    }

    #[tokio::test]
    async fn first_failure_stops_the_run() {
        let f = fixture(ScriptedProvider::new().fail("down.com", "unreachable"));
        let wf = f
            .engine
            .create_workflow(spec(json!([
                { "type": "condition", "config": { "field": "target", "operator": "equals", "threshold": "down.com" } },
                { "type": "scan", "config": { "target": "{{target}}" } },
                { "type": "notify", "config": { "type": "alert", "channel": "slack" } }
            ])))
            .unwrap();

        let exec = f
            .engine
            .execute(&wf.id, ctx(json!({ "target": "down.com" })))
            .await
            .unwrap();
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.steps_completed.len(), 2);
        assert!(!exec.steps_completed[1].success);
        assert!(exec.error.as_deref().unwrap().starts_with("step 1 (scan) failed"));
        assert!(exec.failed_at.is_some());
        assert!(f.slack.sent().is_empty());
    }

    #[tokio::test]
    async fn halt_on_false_fails_the_condition_step() {
        let f = fixture(ScriptedProvider::new());
        let wf = f
            .engine
            .create_workflow(spec(json!([
                { "type": "condition", "config": {
                    "field": "score", "operator": "greater_than", "threshold": 90, "haltOnFalse": true
                } },
                { "type": "notify", "config": { "type": "test", "channel": "slack" } }
            ])))
            .unwrap();
        let exec = f.engine.execute(&wf.id, ctx(json!({ "score": 10 }))).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.steps_completed.len(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_fails_notify_step() {
        let f = fixture_with(
            ScriptedProvider::new(),
            RecordingTransport::failing(Channel::Slack, "webhook 500"),
        );
        let wf = f
            .engine
            .create_workflow(spec(json!([
                { "type": "notify", "config": { "type": "test", "channel": "slack" } }
            ])))
            .unwrap();
        let exec = f.engine.execute(&wf.id, Map::new()).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert!(exec.error.as_deref().unwrap().contains("webhook 500"));
    }

    #[tokio::test]
    async fn action_step_uses_registry_with_scan_context() {
        let f = fixture(ScriptedProvider::new().score("a.com", 20));
        let wf = f
            .engine
            .create_workflow(spec(json!([
                { "type": "scan", "config": { "target": "a.com" } },
                { "type": "action", "config": { "type": "update_blocklist" } }
            ])))
            .unwrap();
        let exec = f.engine.execute(&wf.id, Map::new()).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(matches!(
            &f.controls.calls()[0],
            ControlCall::UpdateBlocklist { entries, .. } if entries == &vec!["a.com".to_string()]
        ));
        assert_eq!(f.provider.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_action_fails_the_step() {
        let f = fixture(ScriptedProvider::new());
        let wf = f
            .engine
            .create_workflow(spec(json!([
                { "type": "action", "config": { "type": "reboot_datacenter" } }
            ])))
            .unwrap();
        let exec = f.engine.execute(&wf.id, Map::new()).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert!(exec.error.as_deref().unwrap().contains("not supported"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_suspends_only_its_execution() {
        let f = fixture(ScriptedProvider::new());
        let wf = f
            .engine
            .create_workflow(spec(json!([
                { "type": "wait", "config": { "seconds": 600 } }
            ])))
            .unwrap();
        let (_, handle) = f.engine.start(&wf.id, Map::new()).unwrap();
        let quick = f
            .engine
            .create_workflow(spec(json!([
                { "type": "condition", "config": { "field": "x", "operator": "equals", "threshold": 1 } }
            ])))
            .unwrap();
        let exec = f.engine.execute(&quick.id, ctx(json!({ "x": 1 }))).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(!handle.is_finished());

        let waited = handle.await.unwrap();
        assert_eq!(waited.status, ExecutionStatus::Completed);
        assert_eq!(waited.context["waited_ms"], 600_000);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_cancels_pending_wait_and_keeps_steps() {
        let f = fixture(ScriptedProvider::new());
        let wf = f
            .engine
            .create_workflow(spec(json!([
                { "type": "condition", "config": { "field": "x", "operator": "equals", "threshold": 1 } },
                { "type": "wait", "config": { "seconds": 3600 } },
                { "type": "notify", "config": { "type": "test", "channel": "slack" } }
            ])))
            .unwrap();
        let (execution_id, handle) = f.engine.start(&wf.id, ctx(json!({ "x": 1 }))).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(f.engine.delete_workflow(&wf.id).unwrap());
        let exec = handle.await.unwrap();
        assert_eq!(exec.execution_id, execution_id);
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.steps_completed.len(), 2);
        assert!(exec.steps_completed[0].success);
        assert!(exec.error.as_deref().unwrap().contains("cancelled"));
        assert!(f.slack.sent().is_empty());

        let recorded = f.history.executions(Some(&wf.id), 10).unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(matches!(
            f.engine.execute(&wf.id, Map::new()).await,
            Err(WatchpostError::NotFound { .. })
        ));
    }

    /// Signals once `record_execution` is entered, then stalls so another
    /// thread can race a delete against it.
    struct StallingRepository {
        inner: MemoryWorkflowRepository,
        entered: Mutex<Option<std::sync::mpsc::Sender<()>>>,
    }

    impl WorkflowRepository for StallingRepository {
        fn insert(&self, workflow: Workflow) -> Result<Workflow> {
            self.inner.insert(workflow)
        }
        fn get(&self, id: &str) -> Result<Workflow> {
            self.inner.get(id)
        }
        fn list(&self) -> Result<Vec<Workflow>> {
            self.inner.list()
        }
        fn remove(&self, id: &str) -> Result<bool> {
            self.inner.remove(id)
        }
        fn record_execution(&self, id: &str) -> Result<Workflow> {
            if let Some(tx) = self.entered.lock().unwrap().take() {
                let _ = tx.send(());
                std::thread::sleep(Duration::from_millis(200));
            }
            self.inner.record_execution(id)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delete_racing_a_start_still_cancels_its_wait() {
        let (tx, rx) = std::sync::mpsc::channel();
        let repo = Arc::new(StallingRepository {
            inner: MemoryWorkflowRepository::default(),
            entered: Mutex::new(Some(tx)),
        });
        let f = fixture_on(repo, ScriptedProvider::new(), RecordingTransport::new(Channel::Slack));
        let wf = f
            .engine
            .create_workflow(spec(json!([{ "type": "wait", "config": { "seconds": 3600 } }])))
            .unwrap();

        let deleter = std::thread::spawn({
            let engine = f.engine.clone();
            let id = wf.id.clone();
            move || {
                rx.recv().unwrap();
                engine.delete_workflow(&id).unwrap()
            }
        });
        let (_, handle) = f.engine.start(&wf.id, Map::new()).unwrap();
        assert!(deleter.join().unwrap());

        let exec = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("wait step was not cancelled")
            .unwrap();
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert!(exec.error.as_deref().unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn every_execute_gets_a_fresh_id_and_count() {
        let f = fixture(ScriptedProvider::new());
        let wf = f
            .engine
            .create_workflow(spec(json!([
                { "type": "condition", "config": { "field": "x", "operator": "equals", "threshold": 1 } }
            ])))
            .unwrap();
        let a = f.engine.execute(&wf.id, Map::new()).await.unwrap();
        let b = f.engine.execute(&wf.id, Map::new()).await.unwrap();
        assert_ne!(a.execution_id, b.execution_id);
        assert_eq!(a.context["condition"], false);
        assert_eq!(f.engine.get_workflow(&wf.id).unwrap().execution_count, 2);
        assert_eq!(f.engine.executions(Some(&wf.id), 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn events_run_matching_workflows_only() {
        let f = fixture(ScriptedProvider::new());
        let mut listening = spec(json!([
            { "type": "notify", "config": { "type": "test", "channel": "slack" } }
        ]));
        listening.trigger = WorkflowTrigger::Event {
            event: "critical_finding".into(),
        };
        let listener = f.engine.create_workflow(listening.clone()).unwrap();
        listening.enabled = false;
        f.engine.create_workflow(listening).unwrap();
        f.engine
            .create_workflow(spec(json!([
                { "type": "notify", "config": { "type": "test", "channel": "slack" } }
            ])))
            .unwrap();

        let runs = f
            .engine
            .trigger_event("critical_finding", ctx(json!({ "target": "a.com" })))
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].workflow_id, listener.id);
        assert_eq!(f.slack.sent().len(), 1);
    }

    #[tokio::test]
    async fn disabled_workflow_refuses_to_execute() {
        let f = fixture(ScriptedProvider::new());
        let mut s = spec(json!([{ "type": "wait", "config": { "seconds": 1 } }]));
        s.enabled = false;
        let wf = f.engine.create_workflow(s).unwrap();
        assert!(matches!(
            f.engine.execute(&wf.id, Map::new()).await,
            Err(WatchpostError::Validation(_))
        ));
    }

    #[test]
    fn invalid_spec_is_rejected() {
        let f = fixture(ScriptedProvider::new());
        let err = f
            .engine
            .create_workflow(spec(json!([{ "type": "wait", "config": { "seconds": 100000 } }])))
            .unwrap_err();
        assert!(matches!(err, WatchpostError::Validation(_)));
    }
}
