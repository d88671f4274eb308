//! Periodic driver for the batch jobs.
//!
//! Three jobs, each with its own [`JobSchedule`]:
//! - reminder generation, daily at `schedule.generation_hour`
//! - delivery, every `schedule.delivery_interval_secs` (only with auto-send)
//! - metrics sweep, daily at `schedule.metrics_sweep_hour`
//!
//! The [`Driver`] owns the last-run state of every job and reads time from an
//! injected [`Clock`]. Tests call the `tick_*` methods directly with a
//! [`ManualClock`](crate::clock::ManualClock); the daemon calls
//! [`Driver::start`], which runs one tokio task per job until
//! [`DriverHandle::shutdown`].

use crate::analytics::{MetricsEngine, RecomputeReport};
use crate::calendar::CivilCalendar;
use crate::clock::Clock;
use crate::config::{Config, DeliveryConfig};
use crate::db::Database;
use crate::error::Result;
use crate::messaging::Messenger;
use crate::reminders::{DeliveryLoop, DeliveryReport, GenerationReport, ReminderGenerator};
use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

// ============================================
// Shutdown signal
// ============================================

/// Cooperative shutdown flag shared by the driver and its batches.
///
/// Batches poll [`Shutdown::is_triggered`] between items; sleeping job loops
/// wait on [`Shutdown::wait`].
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter. Safe to call from a signal handler thread.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the signal is raised.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

// ============================================
// Schedules
// ============================================

/// When a job should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSchedule {
    /// Once per civil day, at or after the given civil hour.
    DailyAt { hour: u32 },
    /// Every N seconds.
    Every { secs: u64 },
}

impl JobSchedule {
    /// Whether a job last run at `last_run` is due at `now`.
    ///
    /// Daily jobs are keyed on the civil date: due once the civil hour is
    /// reached, unless they already ran at or after that hour today.
    pub fn is_due(
        &self,
        last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        calendar: &CivilCalendar,
    ) -> bool {
        match *self {
            JobSchedule::Every { secs } => match last_run {
                None => true,
                Some(last) => (now - last).num_seconds() >= secs as i64,
            },
            JobSchedule::DailyAt { hour } => {
                if calendar.hour_of(now) < hour {
                    return false;
                }
                match last_run {
                    None => true,
                    Some(last) => {
                        let last_date = calendar.date_of(last);
                        let today = calendar.date_of(now);
                        last_date < today || (last_date == today && calendar.hour_of(last) < hour)
                    }
                }
            }
        }
    }
}

impl std::fmt::Display for JobSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobSchedule::DailyAt { hour } => write!(f, "daily at {hour:02}:00"),
            JobSchedule::Every { secs } => {
                if *secs >= 3600 && secs % 3600 == 0 {
                    write!(f, "every {}h", secs / 3600)
                } else if *secs >= 60 && secs % 60 == 0 {
                    write!(f, "every {}m", secs / 60)
                } else {
                    write!(f, "every {}s", secs)
                }
            }
        }
    }
}

/// One job's schedule and bookkeeping.
#[derive(Debug)]
struct JobState {
    name: &'static str,
    schedule: JobSchedule,
    enabled: bool,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl JobState {
    fn new(name: &'static str, schedule: JobSchedule, enabled: bool) -> Self {
        Self {
            name,
            schedule,
            enabled,
            last_run: Mutex::new(None),
        }
    }

    /// Claim the run at `now` if due.
    fn claim(&self, now: DateTime<Utc>, calendar: &CivilCalendar) -> bool {
        if !self.enabled {
            return false;
        }
        let mut last_run = self.last_run.lock().unwrap();
        if self.schedule.is_due(*last_run, now, calendar) {
            *last_run = Some(now);
            true
        } else {
            false
        }
    }

    fn status(&self) -> JobStatus {
        JobStatus {
            name: self.name,
            schedule: self.schedule,
            enabled: self.enabled,
            last_run: *self.last_run.lock().unwrap(),
        }
    }
}

/// Snapshot of a job for display.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: &'static str,
    pub schedule: JobSchedule,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
}

// ============================================
// Driver
// ============================================

/// Owns the jobs and decides when each one runs.
pub struct Driver {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    messenger: Arc<dyn Messenger>,
    calendar: CivilCalendar,
    default_reminder_time: NaiveTime,
    delivery_config: DeliveryConfig,
    tick: Duration,
    generation: JobState,
    delivery: JobState,
    metrics: JobState,
    shutdown: Shutdown,
}

impl Driver {
    /// Build a driver from configuration.
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        messenger: Arc<dyn Messenger>,
        config: &Config,
    ) -> Result<Self> {
        let schedule = &config.schedule;
        Ok(Self {
            db,
            clock,
            messenger,
            calendar: schedule.calendar()?,
            default_reminder_time: schedule.default_reminder_time()?,
            delivery_config: config.delivery.clone(),
            tick: Duration::from_secs(schedule.tick_secs.max(1)),
            generation: JobState::new(
                "generation",
                JobSchedule::DailyAt {
                    hour: schedule.generation_hour,
                },
                true,
            ),
            delivery: JobState::new(
                "delivery",
                JobSchedule::Every {
                    secs: schedule.delivery_interval_secs,
                },
                schedule.auto_send_enabled,
            ),
            metrics: JobState::new(
                "metrics",
                JobSchedule::DailyAt {
                    hour: schedule.metrics_sweep_hour,
                },
                schedule.metrics_sweep_enabled,
            ),
            shutdown: Shutdown::new(),
        })
    }

    /// The driver's shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Schedules and last runs of every job.
    pub fn job_statuses(&self) -> Vec<JobStatus> {
        vec![
            self.generation.status(),
            self.delivery.status(),
            self.metrics.status(),
        ]
    }

    /// Run reminder generation if due. Blocking.
    pub fn tick_generation(&self) -> Result<Option<GenerationReport>> {
        if !self.generation.claim(self.clock.now(), &self.calendar) {
            return Ok(None);
        }
        let generator = ReminderGenerator::new(
            self.db.clone(),
            self.clock.clone(),
            self.calendar,
            self.default_reminder_time,
        )
        .with_shutdown(self.shutdown.clone());
        generator.generate_for_today().map(Some)
    }

    /// Run a delivery batch if due.
    pub async fn tick_delivery(&self) -> Result<Option<DeliveryReport>> {
        if !self.delivery.claim(self.clock.now(), &self.calendar) {
            return Ok(None);
        }
        let delivery = DeliveryLoop::new(
            self.db.clone(),
            self.messenger.clone(),
            self.clock.clone(),
            self.delivery_config.clone(),
        )
        .with_shutdown(self.shutdown.clone());
        delivery.deliver_due().await.map(Some)
    }

    /// Run the metrics sweep if due. Blocking.
    pub fn tick_metrics(&self) -> Result<Option<RecomputeReport>> {
        if !self.metrics.claim(self.clock.now(), &self.calendar) {
            return Ok(None);
        }
        let engine = MetricsEngine::new(self.db.clone(), self.clock.clone(), self.calendar);
        engine.recompute_all().map(Some)
    }

    /// Spawn one task per enabled job and return a handle to stop them.
    ///
    /// Each job runs serially with itself; different jobs run concurrently.
    /// Must be called from within a tokio runtime.
    pub fn start(self: Arc<Self>) -> DriverHandle {
        let mut tasks = Vec::new();

        for status in self.job_statuses() {
            tracing::info!(
                job = status.name,
                schedule = %status.schedule,
                enabled = status.enabled,
                "Driver job"
            );
        }

        let driver = self.clone();
        tasks.push(tokio::spawn(job_loop(
            "generation",
            self.tick,
            self.shutdown.clone(),
            move || {
                let driver = driver.clone();
                async move {
                    let result = tokio::task::spawn_blocking(move || driver.tick_generation()).await;
                    log_tick("generation", result);
                }
            },
        )));

        if self.delivery.enabled {
            let driver = self.clone();
            tasks.push(tokio::spawn(job_loop(
                "delivery",
                self.tick,
                self.shutdown.clone(),
                move || {
                    let driver = driver.clone();
                    async move {
                        if let Err(e) = driver.tick_delivery().await {
                            tracing::error!(job = "delivery", error = %e, "Job failed");
                        }
                    }
                },
            )));
        } else {
            tracing::info!("Auto-send disabled, delivery job not started");
        }

        if self.metrics.enabled {
            let driver = self.clone();
            tasks.push(tokio::spawn(job_loop(
                "metrics",
                self.tick,
                self.shutdown.clone(),
                move || {
                    let driver = driver.clone();
                    async move {
                        let result = tokio::task::spawn_blocking(move || driver.tick_metrics()).await;
                        log_tick("metrics", result);
                    }
                },
            )));
        }

        DriverHandle {
            shutdown: self.shutdown.clone(),
            tasks,
        }
    }
}

fn log_tick<T>(job: &'static str, result: std::result::Result<Result<T>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::error!(job, error = %e, "Job failed"),
        Err(e) => tracing::error!(job, error = %e, "Job panicked"),
    }
}

/// Run `run` every `tick` until shutdown. A run in progress is awaited
/// before the loop checks the signal again.
async fn job_loop<F, Fut>(name: &'static str, tick: Duration, shutdown: Shutdown, mut run: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    tracing::debug!(job = name, "Job loop started");
    while !shutdown.is_triggered() {
        run().await;
        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = shutdown.wait() => break,
        }
    }
    tracing::debug!(job = name, "Job loop stopped");
}

/// Handle to a running driver.
pub struct DriverHandle {
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl DriverHandle {
    /// The signal that stops this driver.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Number of running job loops.
    pub fn job_count(&self) -> usize {
        self.tasks.len()
    }

    /// Raise the shutdown signal and wait for in-flight batches to finish.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Job task ended abnormally");
            }
        }
        tracing::info!("Driver stopped");
    }
}
