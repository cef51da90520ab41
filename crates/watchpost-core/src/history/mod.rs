//! Append-only history of job runs, workflow executions and notification
//! attempts. Written after the fact; never read for control flow.

pub mod db;

pub use db::RedbHistory;

use std::sync::{Arc, RwLock};

use crate::config::HistoryConfig;
use crate::error::{Result, WatchpostError};
use crate::notify::Notification;
use crate::scheduler::JobRun;
use crate::workflow::WorkflowExecution;

pub trait HistoryStore: Send + Sync {
    fn append_job_run(&self, run: &JobRun) -> Result<()>;
    fn append_execution(&self, execution: &WorkflowExecution) -> Result<()>;
    fn append_notification(&self, notification: &Notification) -> Result<()>;

    /// Newest first. `None` means every job.
    fn job_runs(&self, job_id: Option<&str>, limit: usize) -> Result<Vec<JobRun>>;
    /// Newest first. `None` means every workflow.
    fn executions(&self, workflow_id: Option<&str>, limit: usize)
        -> Result<Vec<WorkflowExecution>>;
    /// Newest first.
    fn notifications(&self, limit: usize) -> Result<Vec<Notification>>;
}

/// redb-backed history when `history.path` is set, in-memory otherwise.
pub fn open(cfg: &HistoryConfig) -> Result<Arc<dyn HistoryStore>> {
    match &cfg.path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                crate::io::ensure_dir(parent)?;
            }
            Ok(Arc::new(RedbHistory::open(path)?))
        }
        None => Ok(Arc::new(MemoryHistory::default())),
    }
}

// ---------------------------------------------------------------------------
// MemoryHistory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryHistory {
    runs: RwLock<Vec<JobRun>>,
    executions: RwLock<Vec<WorkflowExecution>>,
    notifications: RwLock<Vec<Notification>>,
}

fn poisoned() -> WatchpostError {
    WatchpostError::History("history lock poisoned".into())
}

fn newest<T: Clone>(items: &[T], keep: impl Fn(&T) -> bool, limit: usize) -> Vec<T> {
    items
        .iter()
        .rev()
        .filter(|i| keep(i))
        .take(limit)
        .cloned()
        .collect()
}

impl HistoryStore for MemoryHistory {
    fn append_job_run(&self, run: &JobRun) -> Result<()> {
        self.runs.write().map_err(|_| poisoned())?.push(run.clone());
        Ok(())
    }

    fn append_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        self.executions
            .write()
            .map_err(|_| poisoned())?
            .push(execution.clone());
        Ok(())
    }

    fn append_notification(&self, notification: &Notification) -> Result<()> {
        self.notifications
            .write()
            .map_err(|_| poisoned())?
            .push(notification.clone());
        Ok(())
    }

    fn job_runs(&self, job_id: Option<&str>, limit: usize) -> Result<Vec<JobRun>> {
        let runs = self.runs.read().map_err(|_| poisoned())?;
        Ok(newest(
            &runs,
            |r| job_id.map_or(true, |id| r.job_id == id),
            limit,
        ))
    }

    fn executions(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>> {
        let execs = self.executions.read().map_err(|_| poisoned())?;
        Ok(newest(
            &execs,
            |e| workflow_id.map_or(true, |id| e.workflow_id == id),
            limit,
        ))
    }

    fn notifications(&self, limit: usize) -> Result<Vec<Notification>> {
        let items = self.notifications.read().map_err(|_| poisoned())?;
        Ok(newest(&items, |_| true, limit))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use serde_json::json;

    use crate::notify::{Channel, Notification, NotificationStatus};
    use crate::scheduler::{JobRun, RunTrigger};

    pub fn run(job_id: &str, run_count: u64) -> JobRun {
        let now = Utc::now();
        JobRun {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            job_name: format!("{job_id} job"),
            trigger: RunTrigger::Scheduled,
            started_at: now,
            completed_at: now,
            results: vec![],
            firings: vec![],
            run_count,
            next_run: None,
        }
    }

    pub fn notification(channel: Channel, status: NotificationStatus) -> Notification {
        Notification {
            id: uuid::Uuid::new_v4().to_string(),
            notification_type: "alert".into(),
            channel,
            payload: json!({}),
            status,
            error: None,
            created_at: Utc::now(),
            sent_at: None,
            failed_at: None,
        }
    }
}
