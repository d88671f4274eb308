//! Database repository layer
//!
//! Provides query and insert operations for all entity types.

use crate::error::{Error, Result};
use crate::reminders::day_classifier::parse_preferred_days;
use crate::types::*;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

/// Format an instant the way every timestamp column stores it.
///
/// Fixed width (millisecond precision, `Z` suffix) so that SQL text
/// comparison orders instants correctly.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_reminder_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// Delivery state counts, for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Undelivered and still eligible for delivery
    pub pending: i64,
    pub delivered: i64,
    pub dead_lettered: i64,
}

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode so the daemon and CLI can share the file
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Learner operations
    // ============================================

    /// Insert or update a learner's reminder preferences.
    ///
    /// The weekly frequency is clamped to `[1, 7]` on the way in. `at` is
    /// recorded as `created_at` for a new learner; updates keep the original.
    pub fn upsert_learner(&self, learner: &LearnerPreference, at: DateTime<Utc>) -> Result<()> {
        let preferred_days = if learner.preferred_days.is_empty() {
            None
        } else {
            let names: Vec<&str> = learner
                .preferred_days
                .iter()
                .map(|d| d.spanish_name())
                .collect();
            Some(serde_json::to_string(&names)?)
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO learners (id, display_name, weekly_frequency, preferred_days,
                                  reminders_enabled, reminder_time, active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                weekly_frequency = excluded.weekly_frequency,
                preferred_days = excluded.preferred_days,
                reminders_enabled = excluded.reminders_enabled,
                reminder_time = excluded.reminder_time,
                active = excluded.active
            "#,
            params![
                learner.learner_id,
                learner.display_name,
                clamp_frequency(learner.weekly_frequency),
                preferred_days,
                learner.reminders_enabled,
                learner.reminder_time.map(|t| t.format("%H:%M").to_string()),
                learner.active,
                format_ts(at),
            ],
        )?;
        Ok(())
    }

    /// Get a learner by ID
    pub fn get_learner(&self, id: &str) -> Result<Option<LearnerPreference>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM learners WHERE id = ?",
            [id],
            Self::row_to_learner,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Whether a learner row exists
    pub fn learner_exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM learners WHERE id = ?",
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Active learners who want daily reminders, ordered by id.
    pub fn list_reminder_learners(&self) -> Result<Vec<LearnerPreference>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM learners
            WHERE active = 1 AND reminders_enabled = 1
            ORDER BY id
            "#,
        )?;
        let learners = stmt
            .query_map([], Self::row_to_learner)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(learners)
    }

    /// IDs of every active learner, ordered.
    pub fn list_active_learner_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM learners WHERE active = 1 ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn row_to_learner(row: &Row) -> rusqlite::Result<LearnerPreference> {
        let learner_id: String = row.get("id")?;
        let preferred_raw: Option<String> = row.get("preferred_days")?;
        let reminder_raw: Option<String> = row.get("reminder_time")?;

        let reminder_time = reminder_raw.as_deref().and_then(|raw| {
            let parsed = parse_reminder_time(raw);
            if parsed.is_none() {
                tracing::warn!(
                    learner_id = %learner_id,
                    reminder_time = raw,
                    "Unparseable reminder time, using default"
                );
            }
            parsed
        });

        Ok(LearnerPreference {
            preferred_days: preferred_raw
                .as_deref()
                .map(parse_preferred_days)
                .unwrap_or_default(),
            display_name: row.get("display_name")?,
            weekly_frequency: row.get("weekly_frequency")?,
            reminders_enabled: row.get("reminders_enabled")?,
            reminder_time,
            active: row.get("active")?,
            learner_id,
        })
    }

    // ============================================
    // Study history operations
    // ============================================

    /// Insert or update a study session
    pub fn upsert_study_session(&self, session: &StudySession) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO study_sessions (id, learner_id, created_at, completed)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                completed = excluded.completed
            "#,
            params![
                session.id,
                session.learner_id,
                format_ts(session.created_at),
                session.completed,
            ],
        )?;
        Ok(())
    }

    /// Insert answers in a single transaction
    pub fn insert_answers(&self, answers: &[Answer]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO answers (session_id, is_correct, answered_at) VALUES (?1, ?2, ?3)",
            )?;
            for answer in answers {
                stmt.execute(params![
                    answer.session_id,
                    answer.is_correct,
                    format_ts(answer.answered_at),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Creation instants of a learner's completed sessions.
    ///
    /// Returned as instants, not dates: the caller decides the civil day.
    pub fn get_completed_session_times(&self, learner_id: &str) -> Result<Vec<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT created_at FROM study_sessions
            WHERE learner_id = ? AND completed = 1
            ORDER BY created_at
            "#,
        )?;
        let mut times = Vec::new();
        for row in stmt.query_map([learner_id], |row| row.get::<_, String>(0))? {
            match row {
                Ok(raw) => match parse_ts(&raw) {
                    Some(at) => times.push(at),
                    None => tracing::warn!(
                        learner_id,
                        created_at = %raw,
                        "Skipping session with unparseable created_at"
                    ),
                },
                Err(e) => {
                    tracing::warn!(learner_id, error = %e, "Skipping unreadable session row")
                }
            }
        }
        Ok(times)
    }

    /// Answer counts across a learner's completed sessions.
    pub fn get_answer_totals(&self, learner_id: &str) -> Result<AnswerTotals> {
        let conn = self.conn.lock().unwrap();
        let (total, correct): (i64, Option<i64>) = conn.query_row(
            r#"
            SELECT COUNT(a.id), SUM(a.is_correct)
            FROM answers a
            JOIN study_sessions s ON s.id = a.session_id
            WHERE s.learner_id = ? AND s.completed = 1
            "#,
            [learner_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(AnswerTotals {
            total,
            correct: correct.unwrap_or(0),
        })
    }

    // ============================================
    // Notification operations
    // ============================================

    /// Whether a reminder is already scheduled for this learner on `date`.
    pub fn reminder_exists_for_date(&self, learner_id: &str, date: NaiveDate) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE learner_id = ?1 AND notification_type = ?2 AND scheduled_date = ?3
            "#,
            params![learner_id, NotificationKind::REMINDER_ID, format_date(date)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a notification.
    ///
    /// A second reminder for the same learner and civil date hits the unique
    /// index and is reported as [`InsertOutcome::AlreadyExists`].
    pub fn insert_notification(&self, notification: &NewNotification) -> Result<InsertOutcome> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"
            INSERT INTO notifications (learner_id, notification_type, title, body,
                                       scheduled_for, scheduled_date, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT DO NOTHING
            "#,
            params![
                notification.learner_id,
                notification.kind.id(),
                notification.title,
                notification.body,
                format_ts(notification.scheduled_for),
                format_date(notification.scheduled_date),
                format_ts(notification.created_at),
            ],
        )?;

        if changed == 0 {
            Ok(InsertOutcome::AlreadyExists)
        } else {
            Ok(InsertOutcome::Created(conn.last_insert_rowid()))
        }
    }

    /// Get a notification by ID
    pub fn get_notification(&self, id: i64) -> Result<Option<Notification>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM notifications WHERE id = ?",
            [id],
            Self::row_to_notification,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Notifications ready for a delivery attempt, oldest scheduled first.
    ///
    /// Selects undelivered, non-dead-lettered rows due at `now` whose last
    /// attempt (if any) happened at or before `retry_before`, and whose
    /// learner has an enabled device with a non-blank token. Rows without a
    /// usable device stay pending and are not selected, so they never take
    /// a batch slot from deliverable ones.
    pub fn list_due_notifications(
        &self,
        now: DateTime<Utc>,
        retry_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Notification>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT n.* FROM notifications n
            JOIN device_registrations d ON d.learner_id = n.learner_id
            WHERE n.delivered = 0
              AND n.dead_lettered = 0
              AND n.scheduled_for <= ?1
              AND (n.last_attempt_at IS NULL OR n.last_attempt_at <= ?2)
              AND d.enabled = 1
              AND TRIM(d.token) != ''
            ORDER BY n.scheduled_for ASC, n.id ASC
            LIMIT ?3
            "#,
        )?;
        let notifications = stmt
            .query_map(
                params![format_ts(now), format_ts(retry_before), limit as i64],
                Self::row_to_notification,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notifications)
    }

    /// Mark a notification delivered. Returns false if it was already delivered
    /// or does not exist.
    pub fn mark_delivered(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE notifications SET delivered = 1, delivered_at = ?2 WHERE id = ?1 AND delivered = 0",
            params![id, format_ts(at)],
        )?;
        Ok(changed > 0)
    }

    /// Record a failed delivery attempt.
    ///
    /// Returns true when this attempt exhausted `max_attempts` and the
    /// notification is now dead-lettered.
    pub fn record_delivery_failure(
        &self,
        id: i64,
        at: DateTime<Utc>,
        error: &str,
        max_attempts: u32,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let dead: Option<bool> = conn
            .query_row(
                r#"
                UPDATE notifications SET
                    delivery_attempts = delivery_attempts + 1,
                    last_attempt_at = ?2,
                    last_error = ?3,
                    dead_lettered = CASE WHEN delivery_attempts + 1 >= ?4 THEN 1 ELSE 0 END
                WHERE id = ?1 AND delivered = 0
                RETURNING dead_lettered
                "#,
                params![id, format_ts(at), error, i64::from(max_attempts)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(dead.unwrap_or(false))
    }

    /// Put dead-lettered notifications back into the delivery queue.
    ///
    /// Limited to one learner when `learner_id` is given. Returns the number
    /// of notifications requeued.
    pub fn requeue_dead_lettered(&self, learner_id: Option<&str>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"
            UPDATE notifications SET
                dead_lettered = 0,
                delivery_attempts = 0,
                last_attempt_at = NULL
            WHERE dead_lettered = 1 AND delivered = 0
              AND (?1 IS NULL OR learner_id = ?1)
            "#,
            params![learner_id],
        )?;
        Ok(changed)
    }

    /// Most recent notifications for a learner, newest first.
    pub fn list_recent_notifications(
        &self,
        learner_id: &str,
        limit: usize,
    ) -> Result<Vec<Notification>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM notifications
            WHERE learner_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#,
        )?;
        let notifications = stmt
            .query_map(params![learner_id, limit as i64], Self::row_to_notification)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notifications)
    }

    /// Unread notifications for a learner.
    pub fn count_unread(&self, learner_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE learner_id = ? AND is_read = 0",
            [learner_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Mark a learner's notification read. Returns false when no such
    /// notification belongs to the learner.
    pub fn mark_read(&self, learner_id: &str, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"
            UPDATE notifications SET
                is_read = 1,
                read_at = COALESCE(read_at, ?3)
            WHERE id = ?1 AND learner_id = ?2
            "#,
            params![id, learner_id, format_ts(at)],
        )?;
        Ok(changed > 0)
    }

    /// Mark that the learner acted on a notification (implies read).
    pub fn mark_action_taken(&self, learner_id: &str, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"
            UPDATE notifications SET
                action_taken = 1,
                action_taken_at = COALESCE(action_taken_at, ?3),
                is_read = 1,
                read_at = COALESCE(read_at, ?3)
            WHERE id = ?1 AND learner_id = ?2
            "#,
            params![id, learner_id, format_ts(at)],
        )?;
        Ok(changed > 0)
    }

    /// Counts of pending, delivered, and dead-lettered notifications.
    pub fn get_delivery_stats(&self) -> Result<DeliveryStats> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN delivered = 0 AND dead_lettered = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN delivered = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN delivered = 0 AND dead_lettered = 1 THEN 1 ELSE 0 END), 0)
            FROM notifications
            "#,
            [],
            |row| {
                Ok(DeliveryStats {
                    pending: row.get(0)?,
                    delivered: row.get(1)?,
                    dead_lettered: row.get(2)?,
                })
            },
        )
        .map_err(Error::from)
    }

    fn row_to_notification(row: &Row) -> rusqlite::Result<Notification> {
        let scheduled_for_str: String = row.get("scheduled_for")?;
        let scheduled_date_str: String = row.get("scheduled_date")?;
        let created_at_str: String = row.get("created_at")?;
        let delivered_at: Option<String> = row.get("delivered_at")?;
        let read_at: Option<String> = row.get("read_at")?;
        let action_taken_at: Option<String> = row.get("action_taken_at")?;
        let last_attempt_at: Option<String> = row.get("last_attempt_at")?;
        let kind: i64 = row.get("notification_type")?;
        let attempts: i64 = row.get("delivery_attempts")?;

        let scheduled_for = parse_ts(&scheduled_for_str).unwrap_or_else(Utc::now);

        Ok(Notification {
            id: row.get("id")?,
            learner_id: row.get("learner_id")?,
            kind: NotificationKind::from_id(kind),
            title: row.get("title")?,
            body: row.get("body")?,
            scheduled_date: parse_date(&scheduled_date_str)
                .unwrap_or_else(|| scheduled_for.date_naive()),
            scheduled_for,
            delivered: row.get("delivered")?,
            read: row.get("is_read")?,
            action_taken: row.get("action_taken")?,
            created_at: parse_ts(&created_at_str).unwrap_or_else(Utc::now),
            delivered_at: delivered_at.as_deref().and_then(parse_ts),
            read_at: read_at.as_deref().and_then(parse_ts),
            action_taken_at: action_taken_at.as_deref().and_then(parse_ts),
            delivery_attempts: u32::try_from(attempts).unwrap_or(0),
            last_attempt_at: last_attempt_at.as_deref().and_then(parse_ts),
            last_error: row.get("last_error")?,
            dead_lettered: row.get("dead_lettered")?,
        })
    }

    // ============================================
    // Device registration operations
    // ============================================

    /// Register (or replace) a learner's push token. Re-enables the device.
    pub fn upsert_device(&self, learner_id: &str, token: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO device_registrations (learner_id, token, enabled, updated_at)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(learner_id) DO UPDATE SET
                token = excluded.token,
                enabled = 1,
                updated_at = excluded.updated_at
            "#,
            params![learner_id, token, format_ts(at)],
        )?;
        Ok(())
    }

    /// Enable or disable pushes for a learner. Returns false if no device is
    /// registered.
    pub fn set_device_enabled(
        &self,
        learner_id: &str,
        enabled: bool,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE device_registrations SET enabled = ?2, updated_at = ?3 WHERE learner_id = ?1",
            params![learner_id, enabled, format_ts(at)],
        )?;
        Ok(changed > 0)
    }

    /// Get a learner's device registration
    pub fn get_device(&self, learner_id: &str) -> Result<Option<DeviceRegistration>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM device_registrations WHERE learner_id = ?",
            [learner_id],
            Self::row_to_device,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Enabled registrations with a non-blank token.
    pub fn list_deliverable_devices(&self) -> Result<Vec<DeviceRegistration>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT d.* FROM device_registrations d
            JOIN learners l ON l.id = d.learner_id
            WHERE d.enabled = 1 AND TRIM(d.token) != '' AND l.active = 1
            ORDER BY d.learner_id
            "#,
        )?;
        let devices = stmt
            .query_map([], Self::row_to_device)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(devices)
    }

    fn row_to_device(row: &Row) -> rusqlite::Result<DeviceRegistration> {
        let updated_at_str: String = row.get("updated_at")?;
        Ok(DeviceRegistration {
            learner_id: row.get("learner_id")?,
            token: row.get("token")?,
            enabled: row.get("enabled")?,
            updated_at: parse_ts(&updated_at_str).unwrap_or_else(Utc::now),
        })
    }

    // ============================================
    // Metrics operations
    // ============================================

    /// Insert or replace a learner's metrics snapshot
    pub fn upsert_metrics(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO metrics_snapshots (learner_id, current_streak, max_streak,
                                           last_study_date, first_study_date, total_study_days,
                                           avg_items_per_day, avg_correctness, computed_at,
                                           calculation_version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(learner_id) DO UPDATE SET
                current_streak = excluded.current_streak,
                max_streak = excluded.max_streak,
                last_study_date = excluded.last_study_date,
                first_study_date = excluded.first_study_date,
                total_study_days = excluded.total_study_days,
                avg_items_per_day = excluded.avg_items_per_day,
                avg_correctness = excluded.avg_correctness,
                computed_at = excluded.computed_at,
                calculation_version = excluded.calculation_version
            "#,
            params![
                snapshot.learner_id,
                snapshot.current_streak,
                snapshot.max_streak,
                snapshot.last_study_date.map(format_date),
                snapshot.first_study_date.map(format_date),
                snapshot.total_study_days,
                snapshot.avg_items_per_day,
                snapshot.avg_correctness,
                format_ts(snapshot.computed_at),
                snapshot.calculation_version,
            ],
        )?;
        Ok(())
    }

    /// Get a learner's metrics snapshot
    pub fn get_metrics(&self, learner_id: &str) -> Result<Option<MetricsSnapshot>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM metrics_snapshots WHERE learner_id = ?",
            [learner_id],
            Self::row_to_metrics,
        )
        .optional()
        .map_err(Error::from)
    }

    fn row_to_metrics(row: &Row) -> rusqlite::Result<MetricsSnapshot> {
        let last_study: Option<String> = row.get("last_study_date")?;
        let first_study: Option<String> = row.get("first_study_date")?;
        let computed_at_str: String = row.get("computed_at")?;

        Ok(MetricsSnapshot {
            learner_id: row.get("learner_id")?,
            current_streak: row.get("current_streak")?,
            max_streak: row.get("max_streak")?,
            last_study_date: last_study.as_deref().and_then(parse_date),
            first_study_date: first_study.as_deref().and_then(parse_date),
            total_study_days: row.get("total_study_days")?,
            avg_items_per_day: row.get("avg_items_per_day")?,
            avg_correctness: row.get("avg_correctness")?,
            computed_at: parse_ts(&computed_at_str).unwrap_or_else(Utc::now),
            calculation_version: row.get("calculation_version")?,
        })
    }
}
