//! Persistent history using redb.
//!
//! # Table design
//!
//! One table per record kind (`job_runs`, `workflow_executions`,
//! `notifications`), each keyed by a 24-byte composite:
//! ```text
//! [ timestamp_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//!
//! Byte order equals time order, so a reverse iteration yields newest
//! first. The uuid suffix only disambiguates records with equal timestamps.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, WatchpostError};
use crate::notify::Notification;
use crate::scheduler::JobRun;
use crate::workflow::WorkflowExecution;

use super::HistoryStore;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: 24-byte composite. Value: JSON-encoded record.
type Table = TableDefinition<'static, &'static [u8], &'static [u8]>;

const JOB_RUNS: Table = TableDefinition::new("job_runs");
const EXECUTIONS: Table = TableDefinition::new("workflow_executions");
const NOTIFICATIONS: Table = TableDefinition::new("notifications");

fn record_key(ts: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(Uuid::new_v4().as_bytes());
    key
}

fn db_err(e: impl std::fmt::Display) -> WatchpostError {
    WatchpostError::History(e.to_string())
}

// ---------------------------------------------------------------------------
// RedbHistory
// ---------------------------------------------------------------------------

pub struct RedbHistory {
    db: Database,
}

impl RedbHistory {
    /// Open or create the database at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        for table in [JOB_RUNS, EXECUTIONS, NOTIFICATIONS] {
            wt.open_table(table).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    fn append<T: Serialize>(
        &self,
        table: Table,
        ts: DateTime<Utc>,
        record: &T,
    ) -> Result<()> {
        let key = record_key(ts);
        let value = serde_json::to_vec(record)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut t = wt.open_table(table).map_err(db_err)?;
            t.insert(key.as_slice(), value.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn newest<T: DeserializeOwned>(
        &self,
        table: Table,
        keep: impl Fn(&T) -> bool,
        limit: usize,
    ) -> Result<Vec<T>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let t = rt.open_table(table).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(db_err)?.rev() {
            if out.len() >= limit {
                break;
            }
            let (_, v) = entry.map_err(db_err)?;
            let record: T = serde_json::from_slice(v.value())?;
            if keep(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }
}

impl HistoryStore for RedbHistory {
    fn append_job_run(&self, run: &JobRun) -> Result<()> {
        self.append(JOB_RUNS, run.completed_at, run)
    }

    fn append_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        self.append(EXECUTIONS, execution.finished_at(), execution)
    }

    fn append_notification(&self, notification: &Notification) -> Result<()> {
        self.append(NOTIFICATIONS, notification.created_at, notification)
    }

    fn job_runs(&self, job_id: Option<&str>, limit: usize) -> Result<Vec<JobRun>> {
        self.newest(
            JOB_RUNS,
            |r: &JobRun| job_id.map_or(true, |id| r.job_id == id),
            limit,
        )
    }

    fn executions(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>> {
        self.newest(
            EXECUTIONS,
            |e: &WorkflowExecution| workflow_id.map_or(true, |id| e.workflow_id == id),
            limit,
        )
    }

    fn notifications(&self, limit: usize) -> Result<Vec<Notification>> {
        self.newest(NOTIFICATIONS, |_: &Notification| true, limit)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
