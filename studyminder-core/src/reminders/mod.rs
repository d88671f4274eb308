//! Daily study reminders
//!
//! - [`day_classifier`]: is today a study day for this learner?
//! - [`generator`]: create at most one reminder per learner per civil day
//! - [`delivery`]: push due notifications to devices, with bounded retry

pub mod day_classifier;
pub mod delivery;
pub mod generator;

pub use day_classifier::{is_study_day, parse_preferred_days};
pub use delivery::{DeliveryLoop, DeliveryReport};
pub use generator::{GenerationReport, ReminderGenerator};
