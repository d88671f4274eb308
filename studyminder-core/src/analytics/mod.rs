//! Analytics module for studyminder
//!
//! Engagement metrics derived from study history:
//! - Streak analysis over civil dates ([`streak`])
//! - Per-learner snapshot recomputation ([`engine`])
//!
//! Snapshots are derived data: they can be deleted and rebuilt from
//! sessions and answers at any time.

pub mod engine;
pub mod streak;

pub use engine::{MetricsEngine, RecomputeReport};
pub use streak::StreakSummary;
