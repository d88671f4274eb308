//! Metrics recomputation engine
//!
//! Rebuilds a learner's [`MetricsSnapshot`] from raw study history. Every
//! recomputation is a full pass, so running it twice yields the same
//! snapshot (apart from `computed_at`).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use studyminder_core::analytics::MetricsEngine;
//!
//! let engine = MetricsEngine::new(db.clone(), clock.clone(), calendar);
//! let snapshot = engine.recompute_for_learner("learner-1")?;
//! println!("streak: {}", snapshot.current_streak);
//!
//! // Nightly sweep
//! let report = engine.recompute_all()?;
//! ```

use super::streak;
use crate::calendar::CivilCalendar;
use crate::clock::Clock;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{MetricsSnapshot, CALCULATION_VERSION};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

/// Round to two decimal places.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Outcome of a sweep over all active learners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecomputeReport {
    /// Learners whose snapshot was written
    pub updated: usize,
    /// Learners whose recomputation failed
    pub failed: usize,
    /// Ids of the failed learners
    pub failed_learners: Vec<String>,
    pub duration_ms: i64,
}

/// Recomputes engagement metrics from completed study sessions.
pub struct MetricsEngine {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    calendar: CivilCalendar,
}

impl MetricsEngine {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, calendar: CivilCalendar) -> Self {
        Self {
            db,
            clock,
            calendar,
        }
    }

    /// Distinct civil days on which the learner completed a session.
    fn study_dates(&self, learner_id: &str) -> Result<BTreeSet<NaiveDate>> {
        Ok(self
            .db
            .get_completed_session_times(learner_id)?
            .into_iter()
            .map(|ts| self.calendar.date_of(ts))
            .collect())
    }

    /// Compute a snapshot without storing it.
    ///
    /// `previous_max` is the maximum streak already on record; the result
    /// never reports a smaller one.
    pub fn compute(&self, learner_id: &str, previous_max: i64) -> Result<MetricsSnapshot> {
        let now = self.clock.now();
        let dates = self.study_dates(learner_id)?;
        let summary = streak::analyze(&dates, self.calendar.date_of(now));
        let totals = self.db.get_answer_totals(learner_id)?;

        let avg_items_per_day = if summary.total_days == 0 {
            0.0
        } else {
            round2(totals.total as f64 / summary.total_days as f64)
        };
        let avg_correctness = if totals.total == 0 {
            0.0
        } else {
            round2(totals.correct as f64 / totals.total as f64 * 100.0)
        };

        Ok(MetricsSnapshot {
            learner_id: learner_id.to_string(),
            current_streak: summary.current_streak,
            max_streak: summary.max_streak.max(previous_max),
            last_study_date: summary.last_study_date,
            first_study_date: summary.first_study_date,
            total_study_days: summary.total_days,
            avg_items_per_day,
            avg_correctness,
            computed_at: now,
            calculation_version: CALCULATION_VERSION,
        })
    }

    /// Recompute and store one learner's snapshot.
    pub fn recompute_for_learner(&self, learner_id: &str) -> Result<MetricsSnapshot> {
        if !self.db.learner_exists(learner_id)? {
            return Err(Error::LearnerNotFound(learner_id.to_string()));
        }

        let previous_max = self
            .db
            .get_metrics(learner_id)?
            .map(|m| m.max_streak)
            .unwrap_or(0);

        let snapshot = self.compute(learner_id, previous_max)?;
        self.db.upsert_metrics(&snapshot)?;

        tracing::debug!(
            learner_id,
            current_streak = snapshot.current_streak,
            max_streak = snapshot.max_streak,
            total_study_days = snapshot.total_study_days,
            "Metrics recomputed"
        );

        Ok(snapshot)
    }

    /// Recompute every active learner.
    ///
    /// A failure for one learner is logged and counted; the sweep continues.
    /// Only a failure to list learners fails the call.
    pub fn recompute_all(&self) -> Result<RecomputeReport> {
        self.recompute_all_with_progress(|_, _, _| {})
    }

    /// Like [`recompute_all`](Self::recompute_all), calling
    /// `on_progress(current, total, learner_id)` before each learner.
    pub fn recompute_all_with_progress<F>(&self, mut on_progress: F) -> Result<RecomputeReport>
    where
        F: FnMut(usize, usize, &str),
    {
        let start = Instant::now();
        let learner_ids = self.db.list_active_learner_ids()?;
        let total = learner_ids.len();
        let mut report = RecomputeReport::default();

        for (i, learner_id) in learner_ids.into_iter().enumerate() {
            on_progress(i, total, &learner_id);
            match self.recompute_for_learner(&learner_id) {
                Ok(_) => report.updated += 1,
                Err(e) => {
                    tracing::warn!(learner_id = %learner_id, error = %e, "Metrics recompute failed");
                    report.failed += 1;
                    report.failed_learners.push(learner_id);
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as i64;
        tracing::info!(
            updated = report.updated,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "Metrics sweep complete"
        );
        Ok(report)
    }

    /// Post-session hook: refresh the learner's metrics, never failing the caller.
    pub fn on_session_completed(&self, learner_id: &str) {
        if let Err(e) = self.recompute_for_learner(learner_id) {
            tracing::error!(learner_id, error = %e, "Failed to update metrics after session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::{Answer, LearnerPreference, StudySession};
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};

    fn setup(now: DateTime<Utc>) -> (Arc<Database>, MetricsEngine) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        db.upsert_learner(&LearnerPreference::new("l1", "Ana"), now)
            .unwrap();
        let calendar = CivilCalendar::new(FixedOffset::west_opt(5 * 3600).unwrap());
        let engine = MetricsEngine::new(db.clone(), Arc::new(ManualClock::new(now)), calendar);
        (db, engine)
    }

    fn session(db: &Database, id: &str, at: DateTime<Utc>, answers: &[bool]) {
        db.upsert_study_session(&StudySession {
            id: id.to_string(),
            learner_id: "l1".to_string(),
            created_at: at,
            completed: true,
        })
        .unwrap();
        let answers: Vec<Answer> = answers
            .iter()
            .map(|&is_correct| Answer {
                session_id: id.to_string(),
                is_correct,
                answered_at: at,
            })
            .collect();
        db.insert_answers(&answers).unwrap();
    }

    #[test]
    fn test_no_history_yields_zeroes() {
        let (_db, engine) = setup(Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap());
        let snapshot = engine.recompute_for_learner("l1").unwrap();

        assert_eq!(snapshot.current_streak, 0);
        assert_eq!(snapshot.max_streak, 0);
        assert_eq!(snapshot.total_study_days, 0);
        assert_eq!(snapshot.avg_items_per_day, 0.0);
        assert_eq!(snapshot.avg_correctness, 0.0);
        assert!(snapshot.last_study_date.is_none());
        assert_eq!(snapshot.calculation_version, CALCULATION_VERSION);
    }

    #[test]
    fn test_averages_rounded() {
        let (db, engine) = setup(Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap());
        session(&db, "s1", Utc.with_ymd_and_hms(2026, 3, 9, 15, 0, 0).unwrap(), &[true, true, false]);
        session(&db, "s2", Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap(), &[true]);

        let snapshot = engine.recompute_for_learner("l1").unwrap();
        assert_eq!(snapshot.total_study_days, 2);
        assert_eq!(snapshot.avg_items_per_day, 2.0);
        assert_eq!(snapshot.avg_correctness, 75.0);

        session(&db, "s3", Utc.with_ymd_and_hms(2026, 3, 10, 16, 0, 0).unwrap(), &[false, false]);
        let snapshot = engine.recompute_for_learner("l1").unwrap();
        assert_eq!(snapshot.avg_items_per_day, 3.0);
        assert_eq!(snapshot.avg_correctness, 50.0);
    }

    #[test]
    fn test_dates_use_civil_offset() {
        // 02:00 UTC on the 10th is the evening of the 9th at UTC-5.
        let (db, engine) = setup(Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap());
        session(&db, "s1", Utc.with_ymd_and_hms(2026, 3, 10, 2, 0, 0).unwrap(), &[]);
        session(&db, "s2", Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap(), &[]);

        let snapshot = engine.recompute_for_learner("l1").unwrap();
        assert_eq!(snapshot.total_study_days, 2);
        assert_eq!(snapshot.current_streak, 2);
        assert_eq!(snapshot.first_study_date, NaiveDate::from_ymd_opt(2026, 3, 9));
    }

    #[test]
    fn test_stored_max_never_decreases() {
        let (db, engine) = setup(Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap());
        session(&db, "s1", Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap(), &[]);

        let mut stored = engine.recompute_for_learner("l1").unwrap();
        stored.max_streak = 9;
        db.upsert_metrics(&stored).unwrap();

        let snapshot = engine.recompute_for_learner("l1").unwrap();
        assert_eq!(snapshot.max_streak, 9);
        assert_eq!(snapshot.current_streak, 1);
    }

    #[test]
    fn test_unknown_learner_is_not_found() {
        let (_db, engine) = setup(Utc::now());
        let err = engine.recompute_for_learner("ghost").unwrap_err();
        assert!(err.is_not_found());
        // The hook swallows the error.
        engine.on_session_completed("ghost");
    }

    #[test]
    fn test_recompute_all_counts_learners() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap();
        let (db, engine) = setup(now);
        db.upsert_learner(&LearnerPreference::new("l2", "Bo"), now)
            .unwrap();

        let report = engine.recompute_all().unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(report.failed, 0);
        assert!(db.get_metrics("l2").unwrap().is_some());
    }

    #[test]
    fn test_recompute_all_isolates_failing_learner() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap();
        let (db, engine) = setup(now);
        db.upsert_learner(&LearnerPreference::new("broken", "Bo"), now)
            .unwrap();
        db.upsert_learner(&LearnerPreference::new("l3", "Cy"), now)
            .unwrap();
        db.connection()
            .execute_batch(
                r#"
                CREATE TRIGGER reject_broken BEFORE INSERT ON metrics_snapshots
                WHEN NEW.learner_id = 'broken'
                BEGIN SELECT RAISE(ABORT, 'snapshot rejected'); END;
                "#,
            )
            .unwrap();

        let report = engine.recompute_all().unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_learners, vec!["broken".to_string()]);
        assert!(db.get_metrics("l1").unwrap().is_some());
        assert!(db.get_metrics("l3").unwrap().is_some());
        assert!(db.get_metrics("broken").unwrap().is_none());
    }

    #[test]
    fn test_recompute_progress_reports_each_learner() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap();
        let (db, engine) = setup(now);
        db.upsert_learner(&LearnerPreference::new("l2", "Bo"), now)
            .unwrap();

        let mut seen = Vec::new();
        let report = engine
            .recompute_all_with_progress(|current, total, id| {
                seen.push((current, total, id.to_string()))
            })
            .unwrap();

        assert_eq!(report.updated, 2);
        assert_eq!(
            seen,
            vec![(0, 2, "l1".to_string()), (1, 2, "l2".to_string())]
        );
    }
}
