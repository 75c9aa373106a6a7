//! Ticker-driven job scheduler
//!
//! Each registered job gets its own task driven by a `tokio::time` interval.
//! An invocation is retried with the job's [`RetryPolicy`]; exhausting the
//! retries records a failed run and the job stays scheduled. Runs of the same
//! job never overlap: a manual trigger waits for an in-flight scheduled run.
//!
//! [`RetryPolicy`]: crate::connection::RetryPolicy

use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{Job, JobId, JobOutcome, JobRun, JobSchedule, JobTrigger};
use crate::types::{CancelFlag, DatastoreError, Result};

/// Runs kept in the history ring
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

struct ScheduledJob {
    id: JobId,
    job: Arc<dyn Job>,
    schedule: JobSchedule,
    cancel: CancelFlag,
    running: Mutex<()>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Bounded history of finished runs, newest last
struct RunLog {
    runs: RwLock<VecDeque<JobRun>>,
    limit: usize,
}

impl RunLog {
    async fn push(&self, run: JobRun) {
        let mut runs = self.runs.write().await;
        runs.push_back(run);
        while runs.len() > self.limit {
            runs.pop_front();
        }
    }
}

pub struct Scheduler {
    jobs: DashMap<JobId, Arc<ScheduledJob>>,
    log: Arc<RunLog>,
    started: std::sync::atomic::AtomicBool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            log: Arc::new(RunLog {
                runs: RwLock::new(VecDeque::new()),
                limit: limit.max(1),
            }),
            started: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Add a job. It starts ticking at [`start`](Self::start), or right away
    /// if the scheduler is already running.
    pub fn register(&self, job: Arc<dyn Job>, schedule: JobSchedule) -> JobId {
        let id = JobId::new();
        let entry = Arc::new(ScheduledJob {
            id,
            job,
            schedule,
            cancel: CancelFlag::new(),
            running: Mutex::new(()),
            task: std::sync::Mutex::new(None),
        });

        info!(
            job = %entry.job.name(),
            job_id = %id,
            every_secs = schedule.every.as_secs(),
            first_run_secs = schedule.offset.as_secs(),
            "Job registered"
        );
        self.jobs.insert(id, entry.clone());

        if self.started.load(std::sync::atomic::Ordering::SeqCst) {
            self.spawn(&entry);
        }
        id
    }

    /// Spawn a ticker task for every registered job not yet running
    pub fn start(&self) {
        self.started.store(true, std::sync::atomic::Ordering::SeqCst);
        for entry in self.jobs.iter() {
            self.spawn(entry.value());
        }
        info!(jobs = self.jobs.len(), "Scheduler started");
    }

    fn spawn(&self, entry: &Arc<ScheduledJob>) {
        let Ok(mut task) = entry.task.lock() else {
            return;
        };
        if task.is_some() || entry.cancel.is_cancelled() {
            return;
        }
        *task = Some(tokio::spawn(run_loop(entry.clone(), self.log.clone())));
    }

    /// Stop a job. An in-flight run finishes its current document and stops;
    /// no further runs are started.
    pub fn cancel(&self, id: JobId) -> Result<()> {
        let entry = self.entry(id)?;
        entry.cancel.cancel();
        info!(job = %entry.job.name(), job_id = %id, "Job cancelled");
        Ok(())
    }

    /// Run a job immediately, outside its cadence, and wait for the result
    pub async fn run_now(&self, id: JobId) -> Result<JobRun> {
        let entry = self.entry(id)?;
        if entry.cancel.is_cancelled() {
            return Err(DatastoreError::Cancelled(format!(
                "job '{}' is cancelled",
                entry.job.name()
            )));
        }
        Ok(execute(&entry, &self.log, JobTrigger::Manual).await)
    }

    fn entry(&self, id: JobId) -> Result<Arc<ScheduledJob>> {
        self.jobs
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| DatastoreError::BadRequest(format!("unknown job {}", id)))
    }

    /// Registered jobs as `(id, name)`
    pub fn jobs(&self) -> Vec<(JobId, String)> {
        self.jobs
            .iter()
            .map(|e| (e.value().id, e.value().job.name().to_string()))
            .collect()
    }

    /// Finished runs, oldest first
    pub async fn history(&self) -> Vec<JobRun> {
        self.log.runs.read().await.iter().cloned().collect()
    }

    pub async fn history_for(&self, id: JobId) -> Vec<JobRun> {
        self.log
            .runs
            .read()
            .await
            .iter()
            .filter(|run| run.job_id == id)
            .cloned()
            .collect()
    }

    /// Cancel every job and wait up to `grace` for in-flight runs to finish.
    /// Tasks still running after that are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        let entries: Vec<_> = self.jobs.iter().map(|e| e.value().clone()).collect();
        for entry in &entries {
            entry.cancel.cancel();
        }

        let deadline = Instant::now() + grace;
        for entry in entries {
            let task = entry.task.lock().ok().and_then(|mut t| t.take());
            let Some(mut task) = task else { continue };
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!(job = %entry.job.name(), "Job did not stop within grace period, aborting");
                task.abort();
            }
        }
        info!("Scheduler stopped");
    }
}

async fn run_loop(entry: Arc<ScheduledJob>, log: Arc<RunLog>) {
    let start = Instant::now() + entry.schedule.offset;
    let mut ticker = interval_at(start, entry.schedule.every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = entry.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        execute(&entry, &log, JobTrigger::Scheduled).await;
    }

    debug!(job = %entry.job.name(), "Job loop exited");
}

async fn execute(entry: &ScheduledJob, log: &RunLog, trigger: JobTrigger) -> JobRun {
    let _running = entry.running.lock().await;
    let name = entry.job.name();
    let started_at = Utc::now();
    info!(job = %name, trigger = ?trigger, "Job started");

    let outcome = entry
        .schedule
        .retry
        .run(name, |_| {
            let job = entry.job.clone();
            let cancel = entry.cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return Err(DatastoreError::Cancelled(job.name().to_string()));
                }
                job.run(cancel).await
            }
        })
        .await;

    let result = match outcome.result {
        Ok(output) => {
            info!(job = %name, attempts = outcome.attempts, summary = %output.summary(), "Job finished");
            JobOutcome::Succeeded(output)
        }
        Err(DatastoreError::Cancelled(_)) => {
            info!(job = %name, "Job cancelled before completion");
            JobOutcome::Cancelled
        }
        Err(e) => {
            error!(job = %name, attempts = outcome.attempts, error = %e, "Job failed");
            JobOutcome::Failed(e.to_string())
        }
    };

    let run = JobRun {
        run_id: Uuid::new_v4(),
        job_id: entry.id,
        job: name.to_string(),
        trigger,
        started_at,
        finished_at: Utc::now(),
        attempts: outcome.attempts,
        outcome: result,
    };
    log.push(run.clone()).await;
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RetryPolicy;
    use crate::migration::MigrationStats;
    use crate::scheduler::job::JobOutput;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails its first `failures` attempts, then succeeds
    struct CountingJob {
        calls: AtomicU32,
        failures: u32,
    }

    impl CountingJob {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                failures,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self, _cancel: CancelFlag) -> Result<JobOutput> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(DatastoreError::Database("store offline".into()));
            }
            Ok(JobOutput::Migration(MigrationStats::default()))
        }
    }

    fn schedule(every_secs: u64, max_retries: u32) -> JobSchedule {
        JobSchedule::every(Duration::from_secs(every_secs))
            .with_retry(RetryPolicy::new(max_retries, Duration::from_secs(1)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_on_cadence() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new(0);
        scheduler.register(job.clone(), schedule(10, 1));
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(job.calls(), 3);
        assert_eq!(scheduler.history().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offset_delays_first_run() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new(0);
        scheduler.register(
            job.clone(),
            schedule(10, 1).with_offset(Duration::from_secs(5)),
        );
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(job.calls(), 0);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(job.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invocation_retries_with_backoff() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new(2);
        let id = scheduler.register(job.clone(), schedule(3600, 3));

        let started = Instant::now();
        let run = scheduler.run_now(id).await.unwrap();

        assert!(run.succeeded());
        assert_eq!(run.attempts, 3);
        assert_eq!(run.trigger, JobTrigger::Manual);
        // 1s then 2s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_do_not_stop_schedule() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new(2);
        let id = scheduler.register(job.clone(), schedule(10, 2));
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(25)).await;

        let history = scheduler.history_for(id).await;
        assert_eq!(history.len(), 2);
        assert!(matches!(history[0].outcome, JobOutcome::Failed(_)));
        assert_eq!(history[0].attempts, 2);
        assert!(history[1].succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_job_stops_running() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new(0);
        let id = scheduler.register(job.clone(), schedule(10, 1));
        scheduler.start();
        scheduler.cancel(id).unwrap();

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(job.calls(), 0);
        assert!(matches!(
            scheduler.run_now(id).await,
            Err(DatastoreError::Cancelled(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_job_is_rejected() {
        let scheduler = Scheduler::new();
        assert!(matches!(
            scheduler.run_now(JobId::new()).await,
            Err(DatastoreError::BadRequest(_))
        ));
        assert!(scheduler.cancel(JobId::new()).is_err());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let scheduler = Scheduler::with_history_limit(2);
        let id = scheduler.register(CountingJob::new(0), schedule(3600, 1));
        for _ in 0..3 {
            scheduler.run_now(id).await.unwrap();
        }
        assert_eq!(scheduler.history().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_all_jobs() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new(0);
        scheduler.register(job.clone(), schedule(10, 1));
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(15)).await;
        scheduler.shutdown(Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(job.calls(), 1);
    }
}
