//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//!
//! Timestamps are stored as RFC 3339 UTC strings with millisecond precision
//! (see [`super::repo::format_ts`]) so they compare correctly as text.
//! Civil dates are stored as `YYYY-MM-DD`.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- Learners and study history (owned upstream)
    -- ============================================

    CREATE TABLE IF NOT EXISTS learners (
        id                 TEXT PRIMARY KEY,
        display_name       TEXT NOT NULL,
        weekly_frequency   INTEGER NOT NULL DEFAULT 3,
        -- JSON list of lowercase day names, e.g. ["lunes","miercoles"]
        preferred_days     TEXT,
        reminders_enabled  INTEGER NOT NULL DEFAULT 1,
        -- HH:MM in the civil timezone
        reminder_time      TEXT,
        active             INTEGER NOT NULL DEFAULT 1,
        created_at         DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS study_sessions (
        id                 TEXT PRIMARY KEY,
        learner_id         TEXT NOT NULL REFERENCES learners(id),
        created_at         DATETIME NOT NULL,
        completed          INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS answers (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id         TEXT NOT NULL REFERENCES study_sessions(id),
        is_correct         INTEGER NOT NULL,
        answered_at        DATETIME NOT NULL
    );

    -- ============================================
    -- Reminders and delivery
    -- ============================================

    CREATE TABLE IF NOT EXISTS notifications (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        learner_id         TEXT NOT NULL REFERENCES learners(id),
        notification_type  INTEGER NOT NULL,
        title              TEXT NOT NULL,
        body               TEXT NOT NULL,
        scheduled_for      DATETIME NOT NULL,
        scheduled_date     TEXT NOT NULL,
        delivered          INTEGER NOT NULL DEFAULT 0,
        is_read            INTEGER NOT NULL DEFAULT 0,
        action_taken       INTEGER NOT NULL DEFAULT 0,
        created_at         DATETIME NOT NULL,
        delivered_at       DATETIME,
        read_at            DATETIME,
        action_taken_at    DATETIME,

        -- Bounded retry bookkeeping
        delivery_attempts  INTEGER NOT NULL DEFAULT 0,
        last_attempt_at    DATETIME,
        last_error         TEXT,
        dead_lettered      INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS device_registrations (
        learner_id         TEXT PRIMARY KEY REFERENCES learners(id),
        token              TEXT NOT NULL,
        enabled            INTEGER NOT NULL DEFAULT 1,
        updated_at         DATETIME NOT NULL
    );

    -- ============================================
    -- Derived (regenerable)
    -- ============================================

    CREATE TABLE IF NOT EXISTS metrics_snapshots (
        learner_id          TEXT PRIMARY KEY REFERENCES learners(id),
        current_streak      INTEGER NOT NULL,
        max_streak          INTEGER NOT NULL,
        last_study_date     TEXT,
        first_study_date    TEXT,
        total_study_days    INTEGER NOT NULL,
        avg_items_per_day   REAL NOT NULL,
        avg_correctness     REAL NOT NULL,
        computed_at         DATETIME NOT NULL,
        calculation_version INTEGER NOT NULL
    );

    -- ============================================
    -- Indexes
    -- ============================================

    -- At most one reminder per learner per civil day.
    CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_daily_reminder
        ON notifications(learner_id, notification_type, scheduled_date)
        WHERE notification_type = 1;

    CREATE INDEX IF NOT EXISTS idx_notifications_pending
        ON notifications(scheduled_for)
        WHERE delivered = 0 AND dead_lettered = 0;
    CREATE INDEX IF NOT EXISTS idx_notifications_learner_created
        ON notifications(learner_id, created_at DESC);
    CREATE INDEX IF NOT EXISTS idx_sessions_learner ON study_sessions(learner_id, completed);
    CREATE INDEX IF NOT EXISTS idx_answers_session ON answers(session_id);
    CREATE INDEX IF NOT EXISTS idx_learners_reminders
        ON learners(reminders_enabled) WHERE active = 1;
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
