//! Civil calendar.
//!
//! Day boundaries are decided in one fixed UTC offset, never in the server's
//! local time. Every conversion from an instant to a calendar date goes
//! through [`CivilCalendar`] so streaks, reminders, and the driver agree on
//! what "today" means.

use crate::types::Weekday;
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike, Utc,
};

/// Converts between UTC instants and civil dates in a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilCalendar {
    offset: FixedOffset,
}

impl CivilCalendar {
    /// Calendar for the given fixed offset.
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Calendar whose civil day is the UTC day.
    pub fn utc() -> Self {
        Self::new(FixedOffset::east_opt(0).expect("zero offset is valid"))
    }

    /// The configured offset.
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Civil date on which `instant` falls.
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// Civil hour (0-23) of `instant`.
    pub fn hour_of(&self, instant: DateTime<Utc>) -> u32 {
        instant.with_timezone(&self.offset).hour()
    }

    /// Civil weekday of a date.
    pub fn weekday_of(&self, date: NaiveDate) -> Weekday {
        Weekday::from(date.weekday())
    }

    /// UTC instant of `time` on civil `date`.
    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        // A fixed offset has no gaps or folds: shift by the offset.
        Utc.from_utc_datetime(&date.and_time(time))
            - Duration::seconds(i64::from(self.offset.local_minus_utc()))
    }
}

impl Default for CivilCalendar {
    fn default() -> Self {
        Self::utc()
    }
}
