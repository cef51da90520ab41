use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::store::memory::Collection;

use super::ScheduledJob;

/// Storage for scheduled jobs. Only the scheduler writes to it.
pub trait JobRepository: Send + Sync {
    fn insert(&self, job: ScheduledJob) -> Result<ScheduledJob>;
    fn get(&self, id: &str) -> Result<ScheduledJob>;
    fn list(&self) -> Result<Vec<ScheduledJob>>;
    fn replace(&self, job: ScheduledJob) -> Result<ScheduledJob>;
    fn remove(&self, id: &str) -> Result<bool>;

    /// Atomically stamp a finished run: `last_run`, `run_count + 1`, and a
    /// `next_run` computed from the job as currently stored.
    fn record_run(
        &self,
        id: &str,
        completed_at: DateTime<Utc>,
        next_run: &(dyn Fn(&ScheduledJob) -> Option<DateTime<Utc>> + Sync),
    ) -> Result<ScheduledJob>;

    fn set_next_run(&self, id: &str, next_run: Option<DateTime<Utc>>) -> Result<()>;
}

pub struct MemoryJobRepository {
    jobs: Collection<ScheduledJob>,
}

impl Default for MemoryJobRepository {
    fn default() -> Self {
        Self {
            jobs: Collection::new("job"),
        }
    }
}

impl JobRepository for MemoryJobRepository {
    fn insert(&self, job: ScheduledJob) -> Result<ScheduledJob> {
        self.jobs.put(job.id.clone(), job)
    }

    fn get(&self, id: &str) -> Result<ScheduledJob> {
        self.jobs.get(id)
    }

    fn list(&self) -> Result<Vec<ScheduledJob>> {
        self.jobs.list()
    }

    fn replace(&self, job: ScheduledJob) -> Result<ScheduledJob> {
        // NotFound when the job was deleted in the meantime.
        self.jobs.get(&job.id)?;
        self.jobs.put(job.id.clone(), job)
    }

    fn remove(&self, id: &str) -> Result<bool> {
        self.jobs.delete(id)
    }

    fn record_run(
        &self,
        id: &str,
        completed_at: DateTime<Utc>,
        next_run: &(dyn Fn(&ScheduledJob) -> Option<DateTime<Utc>> + Sync),
    ) -> Result<ScheduledJob> {
        self.jobs.update(id, |job| {
            job.last_run = Some(completed_at);
            job.run_count += 1;
            job.next_run = next_run(job);
            job.clone()
        })
    }

    fn set_next_run(&self, id: &str, next_run: Option<DateTime<Utc>>) -> Result<()> {
        self.jobs.update(id, |job| job.next_run = next_run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchpostError;
    use crate::scheduler::JobSpec;

    fn job(id: &str) -> ScheduledJob {
        ScheduledJob::from_spec(
            id.into(),
            JobSpec::new("j", vec!["a.com".into()], "0 0 * * *"),
            Utc::now(),
        )
    }

    #[test]
    fn record_run_increments_once_and_stamps() {
        let repo = MemoryJobRepository::default();
        repo.insert(job("j1")).unwrap();
        let now = Utc::now();
        let updated = repo.record_run("j1", now, &|_| Some(now)).unwrap();
        assert_eq!(updated.run_count, 1);
        assert_eq!(updated.last_run, Some(now));
        assert_eq!(updated.next_run, Some(now));
    }

    #[test]
    fn record_run_on_removed_job_is_not_found() {
        let repo = MemoryJobRepository::default();
        repo.insert(job("j1")).unwrap();
        assert!(repo.remove("j1").unwrap());
        let err = repo.record_run("j1", Utc::now(), &|_| None).unwrap_err();
        assert!(matches!(err, WatchpostError::NotFound { .. }));
    }

    #[test]
    fn replace_requires_existing_job() {
        let repo = MemoryJobRepository::default();
        assert!(repo.replace(job("ghost")).is_err());
    }
}
