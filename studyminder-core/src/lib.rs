//! # studyminder-core
//!
//! Core library for studyminder - study reminders and engagement metrics
//! for an exam-prep platform.
//!
//! This library provides:
//! - Domain types for learners, sessions, notifications, and metrics
//! - Database storage layer with SQLite
//! - Reminder generation and delivery with bounded retry
//! - Streak and metrics recomputation
//! - A periodic driver for the batch jobs
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Upstream:** learners, study sessions, and answers, written by the platform
//! - **Queue:** notifications and device registrations, owned here
//! - **Derived:** metrics snapshots (regenerable from upstream data)
//!
//! All day-boundary decisions use one fixed UTC offset
//! ([`CivilCalendar`]), and all "now" readings go through a [`Clock`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use studyminder_core::{Config, Database, ReminderGenerator, SystemClock};
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Arc::new(Database::open(&Config::database_path()).expect("failed to open database"));
//! db.migrate().expect("failed to run migrations");
//!
//! let generator = ReminderGenerator::new(
//!     db,
//!     Arc::new(SystemClock),
//!     config.schedule.calendar().expect("bad offset"),
//!     config.schedule.default_reminder_time().expect("bad time"),
//! );
//! let report = generator.generate_for_today().expect("generation failed");
//! println!("{} created", report.created);
//! ```

// Re-export commonly used items at the crate root
pub use analytics::{MetricsEngine, RecomputeReport};
pub use calendar::CivilCalendar;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use db::{Database, DeliveryStats};
pub use error::{Error, Result};
pub use messaging::{LogMessenger, Messenger, PushClient, PushMessage, SendManyReport};
pub use reminders::{DeliveryLoop, DeliveryReport, GenerationReport, ReminderGenerator};
pub use scheduler::{Driver, DriverHandle, JobSchedule, Shutdown};
pub use service::{ApiResponse, ReminderService};
pub use types::*;

// Public modules
pub mod analytics;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod reminders;
pub mod scheduler;
pub mod service;
pub mod types;
