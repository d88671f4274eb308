//! Decides whether a weekday is a study day for a learner.
//!
//! Explicit preferred days always win. Without them the weekly frequency
//! picks a fixed spread of days:
//!
//! | Frequency | Days |
//! |-----------|------|
//! | 1 | Wed |
//! | 2 | Tue, Thu |
//! | 3 | Mon, Wed, Fri |
//! | 4 | Mon, Tue, Thu, Fri |
//! | 5 | Mon-Fri |
//! | 6 | Mon-Sat |
//! | 7 | every day |
//!
//! Any other frequency falls back to the 3-day spread.

use crate::types::{LearnerPreference, Weekday};

use Weekday::*;

const ONE_DAY: &[Weekday] = &[Wednesday];
const TWO_DAYS: &[Weekday] = &[Tuesday, Thursday];
const THREE_DAYS: &[Weekday] = &[Monday, Wednesday, Friday];
const FOUR_DAYS: &[Weekday] = &[Monday, Tuesday, Thursday, Friday];
const FIVE_DAYS: &[Weekday] = &[Monday, Tuesday, Wednesday, Thursday, Friday];
const SIX_DAYS: &[Weekday] = &[Monday, Tuesday, Wednesday, Thursday, Friday, Saturday];

/// Study days implied by a weekly frequency.
pub fn days_for_frequency(frequency: i64) -> &'static [Weekday] {
    match frequency {
        1 => ONE_DAY,
        2 => TWO_DAYS,
        3 => THREE_DAYS,
        4 => FOUR_DAYS,
        5 => FIVE_DAYS,
        6 => SIX_DAYS,
        7 => &Weekday::ALL,
        _ => THREE_DAYS,
    }
}

/// Whether `weekday` is a study day under `preference`.
pub fn is_study_day(weekday: Weekday, preference: &LearnerPreference) -> bool {
    if !preference.preferred_days.is_empty() {
        return preference.preferred_days.contains(&weekday);
    }
    days_for_frequency(preference.weekly_frequency).contains(&weekday)
}

/// Parse the stored preferred-days payload (a JSON list of day names).
///
/// Never fails. A payload that is not a JSON list of strings means "no
/// preference"; unknown names inside an otherwise valid list are skipped.
pub fn parse_preferred_days(raw: &str) -> Vec<Weekday> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    let names: Vec<String> = match serde_json::from_str(raw) {
        Ok(names) => names,
        Err(e) => {
            tracing::warn!(payload = raw, error = %e, "Malformed preferred days, ignoring");
            return Vec::new();
        }
    };

    let mut days = Vec::with_capacity(names.len());
    for name in &names {
        match name.parse::<Weekday>() {
            Ok(day) if !days.contains(&day) => days.push(day),
            Ok(_) => {}
            Err(_) => tracing::debug!(name = %name, "Ignoring unknown day name"),
        }
    }
    days
}
