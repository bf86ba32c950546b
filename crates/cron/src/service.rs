//! Named job scheduler with replace-on-add semantics.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
    cron::Schedule,
    tokio::{sync::RwLock, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    schedule::{next_run, parse_schedule},
    store::CronJobStore,
    types::{CronParams, JobCallback, SPEC_PARAM, TaskEntry},
};

#[derive(Debug, Default, Clone, Copy)]
struct RunTimes {
    prev: Option<DateTime<Utc>>,
    next: Option<DateTime<Utc>>,
}

struct LiveJob {
    spec: String,
    params: CronParams,
    callback: JobCallback,
    times: Arc<Mutex<RunTimes>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LiveJob {
    fn times(&self) -> RunTimes {
        *self.times.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn shutdown(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Runs callbacks on cron schedules, keyed by job name.
///
/// Each job owns a timer task. Callbacks are spawned so a slow run never
/// delays the next one or any other job. Cancelling the token passed to
/// [`CronScheduler::new`] stops every timer.
pub struct CronScheduler {
    store: Arc<dyn CronJobStore>,
    jobs: RwLock<HashMap<String, LiveJob>>,
    tz: Tz,
    cancel: CancellationToken,
}

impl CronScheduler {
    pub fn new(store: Arc<dyn CronJobStore>, shutdown: &CancellationToken) -> Self {
        Self {
            store,
            jobs: RwLock::new(HashMap::new()),
            tz: Tz::UTC,
            cancel: shutdown.child_token(),
        }
    }

    /// Evaluate schedules in `tz` instead of UTC.
    #[must_use]
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Register `name`, replacing any live job of the same name.
    ///
    /// The parameters are persisted before the new timer starts, so a
    /// failed write leaves the previous job running.
    pub async fn add_cron_job(
        &self,
        name: &str,
        callback: JobCallback,
        params: CronParams,
    ) -> Result<()> {
        let spec = params
            .get(SPEC_PARAM)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::MissingSpec {
                name: name.to_string(),
            })?;
        let schedule = parse_schedule(&spec)?;

        let mut jobs = self.jobs.write().await;
        if self.cancel.is_cancelled() {
            return Err(Error::Stopped);
        }
        self.store.save(name, &params).await?;

        if let Some(old) = jobs.remove(name) {
            debug!(name, old_spec = %old.spec, "replacing cron job");
            old.shutdown();
        }
        let job = self.spawn_job(name, spec.clone(), schedule, callback, params);
        let next = job.times().next;
        jobs.insert(name.to_string(), job);
        info!(name, spec, next = ?next, "cron job added");
        Ok(())
    }

    /// Stop `name` and delete its persisted parameters.
    ///
    /// The record is deleted even when no live job exists.
    pub async fn remove_cron_job(&self, name: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let removed = jobs.remove(name);
        self.store.delete(name).await?;
        match removed {
            Some(job) => {
                job.shutdown();
                info!(name, "cron job removed");
            },
            None => debug!(name, "no live cron job to remove"),
        }
        Ok(())
    }

    /// Persisted jobs whose name starts with `prefix`.
    pub async fn persisted_jobs(&self, prefix: &str) -> Result<Vec<(String, CronParams)>> {
        self.store.list(prefix).await
    }

    /// Parameters of a live job.
    pub async fn job_params(&self, name: &str) -> Option<CronParams> {
        self.jobs.read().await.get(name).map(|j| j.params.clone())
    }

    /// Snapshot of every live job, sorted by name.
    pub async fn task_entries(&self) -> Vec<TaskEntry> {
        let jobs = self.jobs.read().await;
        let mut entries: Vec<TaskEntry> = jobs
            .iter()
            .map(|(name, job)| {
                let (kind, target) = TaskEntry::split_name(name);
                let times = job.times();
                TaskEntry {
                    name: name.clone(),
                    kind: kind.to_string(),
                    target: target.to_string(),
                    spec: job.spec.clone(),
                    prev: times.prev,
                    next: times.next,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Run `name` once now, outside its schedule.
    pub async fn run_now(&self, name: &str) -> Result<()> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(name).ok_or_else(|| Error::job_not_found(name))?;
        job.times.lock().unwrap_or_else(|e| e.into_inner()).prev = Some(Utc::now());
        info!(name, "running cron job now");
        tokio::spawn((job.callback)(job.params.clone()));
        Ok(())
    }

    /// Stop every timer. Persisted jobs are kept.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut jobs = self.jobs.write().await;
        let count = jobs.len();
        for (_, job) in jobs.drain() {
            job.shutdown();
        }
        info!(count, "cron scheduler stopped");
    }

    // ── Internal ────────────────────────────────────────────────────────

    fn spawn_job(
        &self,
        name: &str,
        spec: String,
        schedule: Schedule,
        callback: JobCallback,
        params: CronParams,
    ) -> LiveJob {
        let times = Arc::new(Mutex::new(RunTimes {
            prev: None,
            next: next_run(&schedule, self.tz, Utc::now()),
        }));
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(timer_loop(
            name.to_string(),
            schedule,
            self.tz,
            Arc::clone(&callback),
            params.clone(),
            Arc::clone(&times),
            cancel.clone(),
        ));
        LiveJob {
            spec,
            params,
            callback,
            times,
            cancel,
            handle,
        }
    }
}

async fn timer_loop(
    name: String,
    schedule: Schedule,
    tz: Tz,
    callback: JobCallback,
    params: CronParams,
    times: Arc<Mutex<RunTimes>>,
    cancel: CancellationToken,
) {
    let mut last_run: Option<DateTime<Utc>> = None;
    loop {
        let now = Utc::now();
        // Never fire the same slot twice if the timer wakes early.
        let from = last_run.map_or(now, |last| last.max(now));
        let Some(next) = next_run(&schedule, tz, from) else {
            warn!(name, "cron job has no future runs");
            times.lock().unwrap_or_else(|e| e.into_inner()).next = None;
            return;
        };
        times.lock().unwrap_or_else(|e| e.into_inner()).next = Some(next);

        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(wait) => {},
        }

        last_run = Some(next);
        times.lock().unwrap_or_else(|e| e.into_inner()).prev = Some(next);
        debug!(name, "cron job firing");
        tokio::spawn(callback(params.clone()));
    }
}
