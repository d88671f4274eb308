//! Daily reminder generation.
//!
//! For every active learner with reminders on, creates one reminder for the
//! current civil day when the day classifier says it is a study day. Safe to
//! run repeatedly: the store rejects a second reminder for the same learner
//! and civil date, and that outcome is counted as "already exists".

use super::day_classifier::is_study_day;
use crate::calendar::CivilCalendar;
use crate::clock::Clock;
use crate::db::Database;
use crate::error::Result;
use crate::scheduler::Shutdown;
use crate::types::{InsertOutcome, LearnerPreference, NewNotification, NotificationKind};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Title of every reminder.
pub const REMINDER_TITLE: &str = "Time to study!";

/// Body templates; `{name}` is replaced with the learner's display name.
const REMINDER_TEMPLATES: &[&str] = &[
    "{name}, today is a study day. A short session keeps your streak going!",
    "Hi {name}! Your exam prep is waiting. Ready for a few questions?",
    "{name}, ten minutes of practice today makes exam day easier.",
    "Keep the momentum, {name}! Open a session and review what you learned.",
    "{name}, consistency beats cramming. Time for today's practice.",
];

/// What happened for one learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOutcome {
    Created(i64),
    NotStudyDay,
    AlreadyExists,
}

/// Outcome of one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    /// Civil date the run generated for
    pub date: Option<NaiveDate>,
    pub created: usize,
    pub skipped_not_study_day: usize,
    pub skipped_existing: usize,
    pub failed: usize,
    /// Stopped early because shutdown was requested
    pub interrupted: bool,
    pub duration_ms: i64,
}

/// Pick a reminder body for `name`.
pub fn reminder_body(name: &str) -> String {
    let template = REMINDER_TEMPLATES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(REMINDER_TEMPLATES[0]);
    template.replace("{name}", name.trim())
}

/// Creates the day's reminders.
pub struct ReminderGenerator {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    calendar: CivilCalendar,
    default_time: NaiveTime,
    shutdown: Option<Shutdown>,
}

impl ReminderGenerator {
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        calendar: CivilCalendar,
        default_time: NaiveTime,
    ) -> Self {
        Self {
            db,
            clock,
            calendar,
            default_time,
            shutdown: None,
        }
    }

    /// Stop between learners once `shutdown` is triggered.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|s| s.is_triggered())
    }

    /// Generate reminders for the current civil day.
    ///
    /// Per-learner failures are logged and counted. Failing to list learners
    /// aborts the run.
    pub fn generate_for_today(&self) -> Result<GenerationReport> {
        let start = Instant::now();
        let now = self.clock.now();
        let today = self.calendar.date_of(now);

        let learners = self.db.list_reminder_learners()?;
        let mut report = GenerationReport {
            date: Some(today),
            ..Default::default()
        };

        for learner in &learners {
            if self.shutdown_requested() {
                tracing::info!(date = %today, "Shutdown requested, stopping generation");
                report.interrupted = true;
                break;
            }

            match self.generate_for_learner(learner, today, now) {
                Ok(ReminderOutcome::Created(id)) => {
                    tracing::debug!(learner_id = %learner.learner_id, notification_id = id, "Reminder created");
                    report.created += 1;
                }
                Ok(ReminderOutcome::NotStudyDay) => report.skipped_not_study_day += 1,
                Ok(ReminderOutcome::AlreadyExists) => report.skipped_existing += 1,
                Err(e) => {
                    tracing::warn!(
                        learner_id = %learner.learner_id,
                        error = %e,
                        "Failed to generate reminder"
                    );
                    report.failed += 1;
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as i64;
        tracing::info!(
            date = %today,
            created = report.created,
            skipped_not_study_day = report.skipped_not_study_day,
            skipped_existing = report.skipped_existing,
            failed = report.failed,
            "{} created",
            report.created
        );
        Ok(report)
    }

    /// Classify, check, and insert for one learner on civil date `today`.
    pub fn generate_for_learner(
        &self,
        learner: &LearnerPreference,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<ReminderOutcome> {
        let weekday = self.calendar.weekday_of(today);
        if !is_study_day(weekday, learner) {
            return Ok(ReminderOutcome::NotStudyDay);
        }

        if self
            .db
            .reminder_exists_for_date(&learner.learner_id, today)?
        {
            return Ok(ReminderOutcome::AlreadyExists);
        }

        let time = learner.reminder_time.unwrap_or(self.default_time);
        let notification = NewNotification {
            learner_id: learner.learner_id.clone(),
            kind: NotificationKind::Reminder,
            title: REMINDER_TITLE.to_string(),
            body: reminder_body(&learner.display_name),
            scheduled_for: self.calendar.at(today, time),
            scheduled_date: today,
            created_at: now,
        };

        Ok(match self.db.insert_notification(&notification)? {
            InsertOutcome::Created(id) => ReminderOutcome::Created(id),
            InsertOutcome::AlreadyExists => ReminderOutcome::AlreadyExists,
        })
    }
}
