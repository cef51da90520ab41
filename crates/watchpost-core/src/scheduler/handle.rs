use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cron::CronSchedule;

/// A job's live timer: one spawned loop that sleeps until the next cron
/// instant, runs `on_fire` to completion, and repeats until stopped.
///
/// Fires never overlap. A fire that would have happened while the previous
/// one was still running is dropped, not queued.
pub struct JobHandle {
    job_id: String,
    cancel: CancellationToken,
    firing: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Decrements the live-timer count when the loop task ends, however it ends.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl JobHandle {
    pub fn spawn<F, Fut>(
        job_id: String,
        schedule: CronSchedule,
        active: Arc<AtomicUsize>,
        on_fire: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let firing = Arc::new(AtomicBool::new(false));
        active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(active);

        let task = tokio::spawn({
            let cancel = cancel.clone();
            let firing = firing.clone();
            let job_id = job_id.clone();
            async move {
                let _guard = guard;
                let mut last_fire: Option<DateTime<Utc>> = None;
                loop {
                    let now = Utc::now();
                    let from = last_fire.map_or(now, |l| l.max(now));
                    let Some(next) = schedule.next_after(from) else {
                        debug!(job_id = %job_id, "schedule exhausted");
                        break;
                    };
                    let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if cancel.is_cancelled() {
                        break;
                    }
                    firing.store(true, Ordering::SeqCst);
                    on_fire().await;
                    firing.store(false, Ordering::SeqCst);
                    last_fire = Some(next);
                }
            }
        });

        Self {
            job_id,
            cancel,
            firing,
            task,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Cancel future fires. An idle timer is awaited until its loop has
    /// exited; a fire already in progress is left to finish on its own.
    pub async fn stop(self) {
        self.cancel.cancel();
        if !self.firing.load(Ordering::SeqCst) {
            let _ = self.task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_minute() -> CronSchedule {
        CronSchedule::parse("* * * * *").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn fires_within_a_minute_and_stops() {
        let active = Arc::new(AtomicUsize::new(0));
        let fires = Arc::new(AtomicUsize::new(0));
        let handle = JobHandle::spawn("j1".into(), every_minute(), active.clone(), {
            let fires = fires.clone();
            move || {
                let fires = fires.clone();
                async move {
                    fires.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        assert_eq!(active.load(Ordering::SeqCst), 1);
        assert_eq!(handle.job_id(), "j1");

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(fires.load(Ordering::SeqCst) >= 1);

        handle.stop().await;
        assert_eq!(active.load(Ordering::SeqCst), 0);
        let after_stop = fires.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(fires.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_fire_never_fires() {
        let active = Arc::new(AtomicUsize::new(0));
        let fires = Arc::new(AtomicUsize::new(0));
        let handle = JobHandle::spawn("j1".into(), every_minute(), active.clone(), {
            let fires = fires.clone();
            move || {
                let fires = fires.clone();
                async move {
                    fires.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 0);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}
