//! Streak computation over civil study dates.
//!
//! Input is always a set of distinct civil dates, already converted with the
//! configured [`CivilCalendar`](crate::calendar::CivilCalendar). Both the
//! current and the maximum streak are derived from that one set.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;

/// Everything the metrics engine needs from a study history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreakSummary {
    /// Run ending at the most recent study day, 0 once that day is stale
    pub current_streak: i64,
    /// Longest run of consecutive days
    pub max_streak: i64,
    pub first_study_date: Option<NaiveDate>,
    pub last_study_date: Option<NaiveDate>,
    /// Number of distinct study days
    pub total_days: i64,
}

/// Split sorted dates into maximal runs of consecutive days.
///
/// Within a run `date - rank` is constant, so a change in that key starts a
/// new run. Returns run lengths in date order.
fn run_lengths(dates: &BTreeSet<NaiveDate>) -> Vec<i64> {
    let mut runs = Vec::new();
    let mut current_key: Option<NaiveDate> = None;
    let mut length = 0i64;

    for (rank, date) in dates.iter().enumerate() {
        let key = *date - chrono::Duration::days(rank as i64);
        if current_key == Some(key) {
            length += 1;
        } else {
            if current_key.is_some() {
                runs.push(length);
            }
            current_key = Some(key);
            length = 1;
        }
    }
    if current_key.is_some() {
        runs.push(length);
    }
    runs
}

/// Longest run of consecutive dates. 0 for an empty set.
pub fn max_streak(dates: &BTreeSet<NaiveDate>) -> i64 {
    run_lengths(dates).into_iter().max().unwrap_or(0)
}

/// Length of the run containing the most recent date.
///
/// Forced to 0 when the most recent date is more than one day before
/// `today`: studying yesterday keeps the streak alive, a two-day gap ends it.
pub fn current_streak(dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> i64 {
    let Some(last) = dates.last() else {
        return 0;
    };
    if (today - *last).num_days() > 1 {
        return 0;
    }
    run_lengths(dates).last().copied().unwrap_or(0)
}

/// Compute both streaks plus the date range in one pass over `dates`.
pub fn analyze(dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> StreakSummary {
    StreakSummary {
        current_streak: current_streak(dates, today),
        max_streak: max_streak(dates),
        first_study_date: dates.first().copied(),
        last_study_date: dates.last().copied(),
        total_days: dates.len() as i64,
    }
}
