//! Recurring alert job scheduler.
//!
//! Every registered job gets its own timer task. The first run happens at the
//! job's offset from scheduler start, then once per interval. Jobs without an
//! explicit offset are spread evenly across the startup window in
//! registration order, so upstream rate limits see a staggered load.
//!
//! Each check runs in its own spawned task: an error or panic is logged and
//! counted, and neither the timer nor the other jobs notice. A tick that
//! arrives while the previous run is still going is skipped, not queued.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome of one check run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// Symbols examined
    pub checked: usize,
    /// Notifications delivered
    pub alerts_sent: usize,
    /// Symbols skipped because data was unavailable or stale
    pub skipped: usize,
}

/// A periodic check driven by the scheduler.
#[async_trait]
pub trait AlertCheck: Send + Sync {
    async fn run(&self) -> Result<CheckReport>;
}

/// Per-job run status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub interval_secs: u64,
    pub offset_secs: u64,
    pub running: bool,
    pub runs: u64,
    pub failures: u64,
    pub skipped_ticks: u64,
    pub last_started: Option<DateTime<Utc>>,
    pub last_finished: Option<DateTime<Utc>>,
    pub last_report: Option<CheckReport>,
    pub last_error: Option<String>,
}

struct Job {
    name: String,
    interval: Duration,
    offset: Option<Duration>,
    check: Arc<dyn AlertCheck>,
    running: AtomicBool,
    status: Mutex<JobStatus>,
    /// The check task of the run in flight.
    current_check: Mutex<Option<AbortHandle>>,
}

impl Job {
    fn with_status<R>(&self, f: impl FnOnce(&mut JobStatus) -> R) -> R {
        let mut guard = match self.status.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn set_current_check(&self, handle: Option<AbortHandle>) {
        let mut guard = match self.current_check.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = handle;
    }

    /// Cancel the check of the run in flight, if any.
    fn abort_check(&self) -> bool {
        let guard = match self.current_check.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Claim the job for one run. `false` when a run is already in flight.
    fn try_begin(&self) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            self.with_status(|s| s.skipped_ticks += 1);
            return false;
        }
        self.with_status(|s| {
            s.running = true;
            s.last_started = Some(Utc::now());
        });
        true
    }

    fn finish(&self, outcome: std::result::Result<CheckReport, String>) {
        self.with_status(|s| {
            s.running = false;
            s.runs += 1;
            s.last_finished = Some(Utc::now());
            match outcome {
                Ok(report) => {
                    s.last_report = Some(report);
                    s.last_error = None;
                }
                Err(message) => {
                    s.failures += 1;
                    s.last_error = Some(message);
                }
            }
        });
        self.running.store(false, Ordering::Release);
    }

    /// Run the check in an isolated task and record the result.
    async fn execute(self: Arc<Self>) {
        let started = Instant::now();
        let trace_id = tickerbot_common::logging::generate_trace_id();
        debug!(job = %self.name, trace_id = %trace_id, "Job started");
        let check = self.check.clone();
        let task = tokio::spawn(async move { check.run().await });
        self.set_current_check(Some(task.abort_handle()));
        let result = task.await;
        self.set_current_check(None);
        let outcome = match result {
            Ok(Ok(report)) => {
                info!(
                    job = %self.name,
                    trace_id = %trace_id,
                    checked = report.checked,
                    alerts = report.alerts_sent,
                    skipped = report.skipped,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job finished"
                );
                Ok(report)
            }
            Ok(Err(e)) => {
                error!(job = %self.name, trace_id = %trace_id, error = %e, "Job failed");
                Err(format!("{e:#}"))
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    "check panicked".to_string()
                } else {
                    "check cancelled".to_string()
                };
                error!(job = %self.name, trace_id = %trace_id, error = %join_err, "Job aborted");
                Err(message)
            }
        };
        self.finish(outcome);
    }
}

/// Staggered interval scheduler for alert jobs.
pub struct AlertScheduler {
    jobs: Vec<Arc<Job>>,
    startup_window: Duration,
    shutdown_grace: Duration,
}

impl AlertScheduler {
    pub fn new(startup_window: Duration, shutdown_grace: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            startup_window,
            shutdown_grace,
        }
    }

    /// Register a job. `offset = None` lets the scheduler place it in the startup window.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        offset: Option<Duration>,
        check: Arc<dyn AlertCheck>,
    ) {
        let name = name.into();
        let interval = interval.max(Duration::from_secs(1));
        debug!(job = %name, interval_secs = interval.as_secs(), "Job registered");
        self.jobs.push(Arc::new(Job {
            status: Mutex::new(JobStatus {
                name: name.clone(),
                interval_secs: interval.as_secs(),
                ..Default::default()
            }),
            name,
            interval,
            offset,
            check,
            running: AtomicBool::new(false),
            current_check: Mutex::new(None),
        }));
        self.refresh_offsets();
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Effective first-run offset of every job, in registration order.
    pub fn offsets(&self) -> Vec<(String, Duration)> {
        let auto: Vec<usize> = (0..self.jobs.len())
            .filter(|&i| self.jobs[i].offset.is_none())
            .collect();

        self.jobs
            .iter()
            .enumerate()
            .map(|(i, job)| {
                let offset = job.offset.unwrap_or_else(|| {
                    let slot = auto.iter().position(|&a| a == i).unwrap_or(0);
                    spread_offset(self.startup_window, slot, auto.len())
                });
                (job.name.clone(), offset)
            })
            .collect()
    }

    fn refresh_offsets(&self) {
        for (job, (_, offset)) in self.jobs.iter().zip(self.offsets()) {
            job.with_status(|s| s.offset_secs = offset.as_secs());
        }
    }

    /// Current status of every job.
    pub fn status(&self) -> Vec<JobStatus> {
        self.jobs
            .iter()
            .map(|job| job.with_status(|s| s.clone()))
            .collect()
    }

    /// Run every job once, one after another. Busy jobs are skipped.
    pub async fn run_all_once(&self) -> Vec<JobStatus> {
        for job in &self.jobs {
            if job.try_begin() {
                job.clone().execute().await;
            } else {
                warn!(job = %job.name, "Job still running, skipping manual run");
            }
        }
        self.status()
    }

    /// Drive all jobs until `shutdown` flips to `true`, then drain in-flight checks.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let start = Instant::now();
        info!(jobs = self.jobs.len(), "Alert scheduler started");

        let timers: Vec<JoinHandle<Option<JoinHandle<()>>>> = self
            .jobs
            .iter()
            .zip(self.offsets())
            .map(|(job, (_, offset))| {
                info!(
                    job = %job.name,
                    offset_secs = offset.as_secs(),
                    interval_secs = job.interval.as_secs(),
                    "Job scheduled"
                );
                tokio::spawn(job_loop(job.clone(), start + offset, shutdown.clone()))
            })
            .collect();

        let mut in_flight = Vec::new();
        for timer in timers {
            match timer.await {
                Ok(Some(handle)) => in_flight.push(handle),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Job timer task failed"),
            }
        }

        if in_flight.is_empty() {
            info!("Alert scheduler stopped");
            return;
        }

        info!(
            in_flight = in_flight.len(),
            grace_secs = self.shutdown_grace.as_secs(),
            "Waiting for running jobs"
        );
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(handle) = in_flight.last_mut() {
                let _ = handle.await;
                in_flight.pop();
            }
        })
        .await;

        if drained.is_err() {
            warn!("Grace period elapsed, aborting running jobs");
            for job in &self.jobs {
                if job.abort_check() {
                    debug!(job = %job.name, "Check aborted");
                }
            }
            // Each run finishes as soon as its check is cancelled
            for handle in in_flight {
                let _ = handle.await;
            }
        }
        info!("Alert scheduler stopped");
    }
}

/// Timer loop for one job. Returns the run still in flight at shutdown, if any.
async fn job_loop(
    job: Arc<Job>,
    first_run: Instant,
    mut shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    let mut ticker = interval_at(first_run, job.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut current: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if job.try_begin() {
                    debug!(job = %job.name, "Tick");
                    current = Some(tokio::spawn(job.clone().execute()));
                } else {
                    warn!(job = %job.name, "Previous run still in progress, skipping tick");
                }
            }
        }
    }

    current.filter(|handle| !handle.is_finished())
}

fn spread_offset(window: Duration, slot: usize, slots: usize) -> Duration {
    if slots == 0 {
        return Duration::ZERO;
    }
    window.mul_f64(slot as f64 / slots as f64)
}
