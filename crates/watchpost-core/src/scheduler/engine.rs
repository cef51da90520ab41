use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::cron::CronSchedule;
use crate::error::{Result, WatchpostError};
use crate::events::{EngineEvent, EventBus};
use crate::history::HistoryStore;
use crate::notify::{NotificationDispatcher, SendOptions};
use crate::provider::ScanProvider;
use crate::rules::{AutomationRule, RuleEngine, RuleFiring};
use crate::store::{ConfigStore, ExclusionList};
use crate::types::{ScanOptions, TargetResult};

use super::handle::JobHandle;
use super::repo::JobRepository;
use super::{JobPatch, JobRun, JobSpec, RunTrigger, ScheduledJob};

/// Collaborators the scheduler drives on every tick.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub jobs: Arc<dyn JobRepository>,
    pub store: Arc<dyn ConfigStore>,
    pub provider: Arc<dyn ScanProvider>,
    pub rules: Arc<RuleEngine>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub history: Arc<dyn HistoryStore>,
    pub events: EventBus,
}

struct Inner {
    cfg: SchedulerConfig,
    deps: SchedulerDeps,
    handles: Mutex<HashMap<String, JobHandle>>,
    /// Serializes create/update/delete per job id.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Jobs with a tick in flight.
    running: StdMutex<HashSet<String>>,
    active: Arc<AtomicUsize>,
}

/// Owns every job timer. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Removes the job from the running set when the tick ends.
struct RunningGuard<'a> {
    running: &'a StdMutex<HashSet<String>>,
    job_id: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(&self.job_id);
        }
    }
}

impl Scheduler {
    pub fn new(cfg: SchedulerConfig, deps: SchedulerDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                deps,
                handles: Mutex::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
                running: StdMutex::new(HashSet::new()),
                active: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Register timers for every enabled stored job. Returns how many started.
    pub async fn start(&self) -> Result<usize> {
        let mut started = 0;
        for job in self.inner.deps.jobs.list()? {
            let lock = self.job_lock(&job.id).await;
            let _guard = lock.lock().await;
            if !job.enabled {
                self.inner.deps.jobs.set_next_run(&job.id, None)?;
                continue;
            }
            let schedule = match CronSchedule::parse(&job.cron_expression) {
                Ok(s) => s,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "stored job has an invalid schedule");
                    continue;
                }
            };
            self.inner
                .deps
                .jobs
                .set_next_run(&job.id, schedule.next_after(Utc::now()))?;
            self.start_timer(&job.id, schedule).await;
            started += 1;
        }
        info!(jobs = started, "scheduler started");
        Ok(started)
    }

    /// Stop every timer. In-flight ticks finish on their own.
    pub async fn shutdown(&self) {
        let handles: Vec<JobHandle> = self.inner.handles.lock().await.drain().map(|(_, h)| h).collect();
        let count = handles.len();
        for handle in handles {
            handle.stop().await;
        }
        info!(timers = count, "scheduler stopped");
    }

    /// Live timer loops, including one still finishing a cancelled tick.
    pub fn active_timers(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Job CRUD
    // -----------------------------------------------------------------------

    pub async fn create_job(&self, mut spec: JobSpec) -> Result<ScheduledJob> {
        let schedule = spec.validate()?;
        let inline = self.take_inline_rules(&mut spec)?;
        self.check_references(&spec, &inline, &[])?;

        let now = Utc::now();
        let mut job = ScheduledJob::from_spec(Uuid::new_v4().to_string(), spec, now);
        if job.enabled {
            job.next_run = schedule.next_after(now);
        }

        let lock = self.job_lock(&job.id).await;
        let _guard = lock.lock().await;
        let job = self.inner.deps.jobs.insert(job)?;
        self.register_rules(inline)?;
        if job.enabled {
            self.start_timer(&job.id, schedule).await;
        }
        info!(
            job_id = %job.id,
            name = %job.name,
            targets = job.targets.len(),
            next_run = ?job.next_run,
            "job created"
        );
        Ok(job)
    }

    /// Re-validate the merged job and swap its timer (stop, then start).
    pub async fn update_job(&self, id: &str, patch: JobPatch) -> Result<ScheduledJob> {
        let lock = self.job_lock(id).await;
        let _guard = lock.lock().await;

        let current = self.inner.deps.jobs.get(id)?;
        let mut spec = current.to_spec();
        patch.apply_to(&mut spec);
        let schedule = spec.validate()?;
        let inline = self.take_inline_rules(&mut spec)?;
        self.check_references(&spec, &inline, &current.rule_ids)?;

        let now = Utc::now();
        let mut job = current.with_spec(spec, now);
        job.next_run = if job.enabled {
            schedule.next_after(now)
        } else {
            None
        };
        let job = self.inner.deps.jobs.replace(job)?;
        self.register_rules(inline)?;

        self.stop_timer(id).await;
        if job.enabled {
            self.start_timer(id, schedule).await;
        }
        info!(job_id = %id, enabled = job.enabled, next_run = ?job.next_run, "job updated");
        Ok(job)
    }

    /// Stop the timer and remove the job. Deleting an unknown id is a no-op
    /// returning `false`. A tick already in flight still finishes and is
    /// recorded.
    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        let lock = self.job_lock(id).await;
        let removed = {
            let _guard = lock.lock().await;
            self.stop_timer(id).await;
            self.inner.deps.jobs.remove(id)?
        };
        self.inner.locks.lock().await.remove(id);
        if removed {
            self.inner.deps.events.publish(EngineEvent::JobDeleted {
                job_id: id.to_string(),
            });
            info!(job_id = %id, "job deleted");
        }
        Ok(removed)
    }

    pub fn get_job(&self, id: &str) -> Result<ScheduledJob> {
        self.inner.deps.jobs.get(id)
    }

    pub fn list_jobs(&self) -> Result<Vec<ScheduledJob>> {
        self.inner.deps.jobs.list()
    }

    /// Newest first.
    pub fn job_runs(&self, id: &str, limit: usize) -> Result<Vec<JobRun>> {
        self.inner.deps.history.job_runs(Some(id), limit)
    }

    /// Run the job now, outside its schedule. `None` when a tick for the job
    /// is already in flight.
    pub async fn trigger_now(&self, id: &str) -> Result<Option<JobRun>> {
        self.inner.deps.jobs.get(id)?;
        self.run_tick(id, RunTrigger::Manual).await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn job_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.inner
            .locks
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Profiles and exclusion lists must exist. Rule ids must be unique and
    /// either stored, pending in `inline`, or already `accepted` on the job
    /// (a rule deleted since then is skipped at tick time).
    fn check_references(&self, spec: &JobSpec, inline: &[AutomationRule], accepted: &[String]) -> Result<()> {
        let store = &self.inner.deps.store;
        if let Some(profile) = &spec.scan_profile {
            store.get_profile(profile).map_err(|_| {
                WatchpostError::validation(format!("job '{}' references unknown scan profile '{profile}'", spec.name))
            })?;
        }
        for list in &spec.exclusion_lists {
            store.get_exclusion(list).map_err(|_| {
                WatchpostError::validation(format!("job '{}' references unknown exclusion list '{list}'", spec.name))
            })?;
        }
        let mut seen = HashSet::new();
        for id in &spec.rule_ids {
            if !seen.insert(id.as_str()) {
                return Err(WatchpostError::validation(format!(
                    "job '{}' lists rule '{id}' more than once",
                    spec.name
                )));
            }
            if inline.iter().any(|r| &r.id == id) || accepted.contains(id) {
                continue;
            }
            store.get_rule(id).map_err(|_| {
                WatchpostError::validation(format!("job '{}' references unknown rule '{id}'", spec.name))
            })?;
        }
        Ok(())
    }

    /// Give each inline rule its id and append it to `rule_ids`. Nothing is
    /// stored until the job itself is written.
    fn take_inline_rules(&self, spec: &mut JobSpec) -> Result<Vec<AutomationRule>> {
        let mut rules = std::mem::take(&mut spec.automation_rules);
        for rule in &mut rules {
            if rule.id.trim().is_empty() {
                rule.id = Uuid::new_v4().to_string();
            } else if self.inner.deps.store.get_rule(&rule.id).is_ok() {
                return Err(WatchpostError::validation(format!(
                    "inline rule id '{}' is already in use",
                    rule.id
                )));
            }
            rule.triggered_count = 0;
            spec.rule_ids.push(rule.id.clone());
        }
        Ok(rules)
    }

    fn register_rules(&self, rules: Vec<AutomationRule>) -> Result<()> {
        for rule in rules {
            let rule = self.inner.deps.store.put_rule(rule)?;
            debug!(rule_id = %rule.id, name = %rule.name, "registered inline rule");
        }
        Ok(())
    }

    async fn start_timer(&self, id: &str, schedule: CronSchedule) {
        let weak = Arc::downgrade(&self.inner);
        let job_id = id.to_string();
        let handle = JobHandle::spawn(id.to_string(), schedule, self.inner.active.clone(), move || {
            let weak = weak.clone();
            let job_id = job_id.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let scheduler = Scheduler { inner };
                match scheduler.run_tick(&job_id, RunTrigger::Scheduled).await {
                    Ok(_) => {}
                    Err(WatchpostError::NotFound { .. }) => {
                        debug!(job_id = %job_id, "timer fired for a removed job")
                    }
                    Err(e) => warn!(job_id = %job_id, error = %e, "scheduled tick failed"),
                }
            }
        });
        let replaced = self.inner.handles.lock().await.insert(id.to_string(), handle);
        if let Some(old) = replaced {
            old.stop().await;
        }
    }

    async fn stop_timer(&self, id: &str) {
        let handle = self.inner.handles.lock().await.remove(id);
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    /// One batch: scan every target, check rules, notify, record.
    async fn run_tick(&self, id: &str, trigger: RunTrigger) -> Result<Option<JobRun>> {
        let deps = &self.inner.deps;
        {
            let mut running = self
                .inner
                .running
                .lock()
                .map_err(|_| WatchpostError::Store("running set lock poisoned".into()))?;
            if !running.insert(id.to_string()) {
                info!(job_id = %id, "previous tick still running; skipping");
                return Ok(None);
            }
        }
        let _running = RunningGuard {
            running: &self.inner.running,
            job_id: id.to_string(),
        };

        let job = deps.jobs.get(id)?;
        let started_at = Utc::now();
        debug!(job_id = %id, targets = job.targets.len(), "tick started");

        let results = self.scan_targets(&job).await;

        let mut firings: Vec<RuleFiring> = Vec::new();
        for entry in &results {
            if let Some(result) = &entry.result {
                firings.extend(deps.rules.check_triggers(&job, result).await);
            }
        }
        self.notify_results(&job, &results).await;

        let completed_at = Utc::now();
        let next_after = |stored: &ScheduledJob| {
            if !stored.enabled {
                return None;
            }
            CronSchedule::parse(&stored.cron_expression)
                .ok()
                .and_then(|s| s.next_after(completed_at))
        };
        let (run_count, next_run) = match deps.jobs.record_run(id, completed_at, &next_after) {
            Ok(updated) => (updated.run_count, updated.next_run),
            Err(WatchpostError::NotFound { .. }) => {
                info!(job_id = %id, "job deleted during tick; recording run without next fire");
                (job.run_count + 1, None)
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "could not stamp job run");
                (job.run_count + 1, job.next_run)
            }
        };

        let run = JobRun {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            trigger,
            started_at,
            completed_at,
            results,
            firings,
            run_count,
            next_run,
        };
        if let Err(e) = deps.history.append_job_run(&run) {
            warn!(job_id = %id, error = %e, "failed to record job run");
        }
        deps.events.publish(EngineEvent::JobRunCompleted {
            job_id: run.job_id.clone(),
            run_id: run.id.clone(),
            run_count: run.run_count,
            succeeded: run.succeeded(),
            failed: run.failed(),
        });
        info!(
            job_id = %id,
            succeeded = run.succeeded(),
            failed = run.failed(),
            firings = run.firings.len(),
            run_count,
            "job run completed"
        );
        Ok(Some(run))
    }

    /// One entry per target, in target order. Failures never abort siblings.
    async fn scan_targets(&self, job: &ScheduledJob) -> Vec<TargetResult> {
        let deps = &self.inner.deps;
        let options = self.effective_options(job);
        let exclusions = self.exclusions(job);
        let permits = Arc::new(Semaphore::new(self.inner.cfg.max_concurrent_scans.max(1)));
        let timeout_secs = self.inner.cfg.tick_timeout_secs;

        enum Slot {
            Done(TargetResult),
            Pending(String, tokio::task::JoinHandle<TargetResult>),
        }

        let mut slots = Vec::with_capacity(job.targets.len());
        for target in &job.targets {
            if let Some(list) = exclusions.iter().find(|l| l.matches(target)) {
                debug!(job_id = %job.id, target = %target, list = %list.name, "target excluded");
                slots.push(Slot::Done(TargetResult::excluded(target.clone(), list.name.clone())));
                continue;
            }
            let provider = deps.provider.clone();
            let permits = permits.clone();
            let options = options.clone();
            let target = target.clone();
            let task = tokio::spawn({
                let target = target.clone();
                async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return TargetResult::failed(target, "scan pool closed");
                    };
                    let scan = provider.run_scan(&target, &options);
                    let outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), scan).await;
                    match outcome {
                        Ok(Ok(result)) => TargetResult::succeeded(result),
                        Ok(Err(e)) => TargetResult::failed(target, e.to_string()),
                        Err(_) => {
                            let err = WatchpostError::Provider {
                                target: target.clone(),
                                message: format!("timed out after {timeout_secs}s"),
                            };
                            TargetResult::failed(target, err.to_string())
                        }
                    }
                }
            });
            slots.push(Slot::Pending(target, task));
        }

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            let entry = match slot {
                Slot::Done(entry) => entry,
                Slot::Pending(target, task) => match task.await {
                    Ok(entry) => entry,
                    Err(e) => TargetResult::failed(target, format!("scan task aborted: {e}")),
                },
            };
            if let Some(error) = &entry.error {
                warn!(job_id = %job.id, target = %entry.target, error = %error, "target scan failed");
            }
            results.push(entry);
        }
        results
    }

    /// Profile options first, the job's own options on top.
    fn effective_options(&self, job: &ScheduledJob) -> ScanOptions {
        let Some(profile_id) = &job.scan_profile else {
            return job.scan_options.clone();
        };
        match self.inner.deps.store.get_profile(profile_id) {
            Ok(profile) => profile.options.merged_with(&job.scan_options),
            Err(e) => {
                warn!(job_id = %job.id, profile = %profile_id, error = %e, "scan profile unavailable");
                job.scan_options.clone()
            }
        }
    }

    fn exclusions(&self, job: &ScheduledJob) -> Vec<ExclusionList> {
        job.exclusion_lists
            .iter()
            .filter_map(|id| match self.inner.deps.store.get_exclusion(id) {
                Ok(list) => Some(list),
                Err(e) => {
                    warn!(job_id = %job.id, list = %id, error = %e, "exclusion list unavailable");
                    None
                }
            })
            .collect()
    }

    async fn notify_results(&self, job: &ScheduledJob, results: &[TargetResult]) {
        let settings = &job.notification_settings;
        let options = SendOptions::to(settings.recipients.clone());

        for entry in results {
            if entry.excluded_by.is_some() {
                continue;
            }
            match &entry.result {
                Some(result) => {
                    let mut data = result.template_data();
                    data.insert("job_id".into(), Value::from(job.id.clone()));
                    data.insert("job_name".into(), Value::from(job.name.clone()));
                    let data = Value::Object(data);
                    let critical = result.summary.critical_findings > 0;

                    if settings.on_complete {
                        self.send_direct("scan_complete", job, &data, &options).await;
                    }
                    if settings.on_critical_findings && critical {
                        self.send_direct("critical_finding", job, &data, &options).await;
                    }
                    self.fire_trigger("scan_completed", &data).await;
                    if critical {
                        self.fire_trigger("critical_finding", &data).await;
                    }
                }
                None => {
                    let data = json!({
                        "target": entry.target,
                        "error": entry.error.clone().unwrap_or_default(),
                        "job_id": job.id,
                        "job_name": job.name,
                    });
                    if settings.on_failure {
                        self.send_direct("scan_failed", job, &data, &options).await;
                    }
                    self.fire_trigger("scan_failed", &data).await;
                }
            }
        }
    }

    async fn send_direct(&self, kind: &str, job: &ScheduledJob, data: &Value, options: &SendOptions) {
        let channels = &job.notification_settings.channels;
        for outcome in self
            .inner
            .deps
            .dispatcher
            .send_all(kind, channels, data, options)
            .await
        {
            if let Err(e) = outcome {
                warn!(job_id = %job.id, notification_type = kind, error = %e, "job notification not sent");
            }
        }
    }

    async fn fire_trigger(&self, trigger: &str, data: &Value) {
        if let Err(e) = self.inner.deps.dispatcher.process_trigger(trigger, data).await {
            warn!(trigger, error = %e, "notification trigger failed");
        }
    }
}
