//! Core domain types for studyminder
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Learner** | A person preparing for an exam; identified by an opaque string id |
//! | **Study session** | One sitting of practice; only completed sessions count |
//! | **Civil date** | Calendar date in the configured fixed UTC offset |
//! | **Streak** | Consecutive civil days with at least one completed session |
//! | **Reminder** | Notification of kind [`NotificationKind::Reminder`] (type id 1) |
//! | **Device registration** | The learner's current push token (latest wins) |

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Weekday
// ============================================

/// Day of the week.
///
/// Stored preferences use lowercase day names; they are parsed into this
/// enum once, when a learner row is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    /// All days, Monday first.
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        }
    }

    /// Spanish day name, the format the learner profile stores.
    pub fn spanish_name(&self) -> &'static str {
        match self {
            Weekday::Monday => "lunes",
            Weekday::Tuesday => "martes",
            Weekday::Wednesday => "miercoles",
            Weekday::Thursday => "jueves",
            Weekday::Friday => "viernes",
            Weekday::Saturday => "sabado",
            Weekday::Sunday => "domingo",
        }
    }
}

impl std::fmt::Display for Weekday {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Weekday {
    type Err = String;

    /// Accepts Spanish (with or without accents) and English names, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lunes" | "monday" => Ok(Weekday::Monday),
            "martes" | "tuesday" => Ok(Weekday::Tuesday),
            "miercoles" | "miércoles" | "wednesday" => Ok(Weekday::Wednesday),
            "jueves" | "thursday" => Ok(Weekday::Thursday),
            "viernes" | "friday" => Ok(Weekday::Friday),
            "sabado" | "sábado" | "saturday" => Ok(Weekday::Saturday),
            "domingo" | "sunday" => Ok(Weekday::Sunday),
            other => Err(format!("unknown weekday: {}", other)),
        }
    }
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

// ============================================
// Learner preferences
// ============================================

/// Lowest and highest weekly study frequency a learner can ask for.
pub const MIN_WEEKLY_FREQUENCY: i64 = 1;
pub const MAX_WEEKLY_FREQUENCY: i64 = 7;

/// Frequency used when a learner never set one.
pub const DEFAULT_WEEKLY_FREQUENCY: i64 = 3;

/// Clamp a weekly frequency into `[1, 7]`.
pub fn clamp_frequency(frequency: i64) -> i64 {
    frequency.clamp(MIN_WEEKLY_FREQUENCY, MAX_WEEKLY_FREQUENCY)
}

/// The part of a learner profile that drives reminders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerPreference {
    /// Learner identifier
    pub learner_id: String,
    /// Name used to personalize reminder text
    pub display_name: String,
    /// Target study days per week
    pub weekly_frequency: i64,
    /// Explicit study days; overrides `weekly_frequency` when non-empty
    pub preferred_days: Vec<Weekday>,
    /// Whether daily reminders are generated for this learner
    pub reminders_enabled: bool,
    /// Civil time of day the reminder is scheduled for
    pub reminder_time: Option<NaiveTime>,
    /// Inactive learners are ignored by every batch job
    pub active: bool,
}

impl LearnerPreference {
    /// A learner with reminders on and default preferences.
    pub fn new(learner_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            learner_id: learner_id.into(),
            display_name: display_name.into(),
            weekly_frequency: DEFAULT_WEEKLY_FREQUENCY,
            preferred_days: Vec::new(),
            reminders_enabled: true,
            reminder_time: None,
            active: true,
        }
    }

    pub fn with_frequency(mut self, frequency: i64) -> Self {
        self.weekly_frequency = frequency;
        self
    }

    pub fn with_preferred_days(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.preferred_days = days.into_iter().collect();
        self
    }

    pub fn with_reminder_time(mut self, time: NaiveTime) -> Self {
        self.reminder_time = Some(time);
        self
    }

    pub fn with_reminders(mut self, enabled: bool) -> Self {
        self.reminders_enabled = enabled;
        self
    }
}

// ============================================
// Study history
// ============================================

/// One study session (exam-prep sitting).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudySession {
    /// Session identifier
    pub id: String,
    /// Owning learner
    pub learner_id: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Only completed sessions count toward streaks and metrics
    pub completed: bool,
}

/// One answered item inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub session_id: String,
    pub is_correct: bool,
    pub answered_at: DateTime<Utc>,
}

/// Answer counts over a learner's completed sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnswerTotals {
    pub total: i64,
    pub correct: i64,
}

// ============================================
// Notifications
// ============================================

/// Category of a notification.
///
/// Only reminders are produced here; other categories are stored and
/// delivered untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", from = "i64")]
pub enum NotificationKind {
    /// Daily study reminder
    Reminder,
    /// Any other category, by numeric type id
    Other(i64),
}

impl NotificationKind {
    pub const REMINDER_ID: i64 = 1;

    /// Numeric type id as stored and sent to devices.
    pub fn id(&self) -> i64 {
        match self {
            NotificationKind::Reminder => Self::REMINDER_ID,
            NotificationKind::Other(id) => *id,
        }
    }

    pub fn from_id(id: i64) -> Self {
        match id {
            Self::REMINDER_ID => NotificationKind::Reminder,
            other => NotificationKind::Other(other),
        }
    }
}

impl From<NotificationKind> for i64 {
    fn from(kind: NotificationKind) -> Self {
        kind.id()
    }
}

impl From<i64> for NotificationKind {
    fn from(id: i64) -> Self {
        NotificationKind::from_id(id)
    }
}

/// A notification row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Store-assigned id
    pub id: i64,
    /// Owning learner
    pub learner_id: String,
    /// Category
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    /// Instant the notification becomes due
    pub scheduled_for: DateTime<Utc>,
    /// Civil date of `scheduled_for` (the idempotency key for reminders)
    pub scheduled_date: NaiveDate,
    pub delivered: bool,
    pub read: bool,
    pub action_taken: bool,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub action_taken_at: Option<DateTime<Utc>>,
    /// Failed delivery attempts so far
    pub delivery_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Gave up after too many failed attempts
    pub dead_lettered: bool,
}

/// Fields needed to create a notification.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub learner_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub scheduled_for: DateTime<Utc>,
    pub scheduled_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Outcome of inserting a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row created with this id
    Created(i64),
    /// A reminder for the same learner and civil date was already stored
    AlreadyExists,
}

/// A learner's notifications for display, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationFeed {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
}

// ============================================
// Metrics
// ============================================

/// Version tag written with every snapshot.
///
/// Increment this when the way a metric is computed changes.
pub const CALCULATION_VERSION: i32 = 1;

/// Engagement metrics for one learner, recomputed from history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub learner_id: String,
    /// Run length ending at the most recent study day, 0 once stale
    pub current_streak: i64,
    /// Longest run ever observed; never decreases
    pub max_streak: i64,
    pub last_study_date: Option<NaiveDate>,
    pub first_study_date: Option<NaiveDate>,
    /// Distinct civil days with a completed session
    pub total_study_days: i64,
    /// Answered items per active day
    pub avg_items_per_day: f64,
    /// Percentage of correct answers, two decimals
    pub avg_correctness: f64,
    pub computed_at: DateTime<Utc>,
    pub calculation_version: i32,
}

// ============================================
// Devices
// ============================================

/// A learner's current push registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub learner_id: String,
    pub token: String,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl DeviceRegistration {
    /// Whether a push can be sent to this registration.
    pub fn is_deliverable(&self) -> bool {
        self.enabled && !self.token.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekday_parses_spanish_and_english() {
        assert_eq!("lunes".parse::<Weekday>().unwrap(), Weekday::Monday);
        assert_eq!("Miércoles".parse::<Weekday>().unwrap(), Weekday::Wednesday);
        assert_eq!("SABADO".parse::<Weekday>().unwrap(), Weekday::Saturday);
        assert_eq!("sunday".parse::<Weekday>().unwrap(), Weekday::Sunday);
        assert!("someday".parse::<Weekday>().is_err());
    }

    #[test]
    fn test_weekday_names_round_trip() {
        for day in Weekday::ALL {
            assert_eq!(day.spanish_name().parse::<Weekday>().unwrap(), day);
            assert_eq!(day.as_str().parse::<Weekday>().unwrap(), day);
        }
    }

    #[test]
    fn test_clamp_frequency() {
        assert_eq!(clamp_frequency(0), 1);
        assert_eq!(clamp_frequency(4), 4);
        assert_eq!(clamp_frequency(12), 7);
    }

    #[test]
    fn test_notification_kind_ids() {
        assert_eq!(NotificationKind::Reminder.id(), 1);
        assert_eq!(NotificationKind::from_id(1), NotificationKind::Reminder);
        assert_eq!(NotificationKind::from_id(4), NotificationKind::Other(4));
    }

    #[test]
    fn test_device_deliverable() {
        let mut device = DeviceRegistration {
            learner_id: "l1".to_string(),
            token: "tok".to_string(),
            enabled: true,
            updated_at: Utc::now(),
        };
        assert!(device.is_deliverable());

        device.token = "   ".to_string();
        assert!(!device.is_deliverable());

        device.token = "tok".to_string();
        device.enabled = false;
        assert!(!device.is_deliverable());
    }
}
