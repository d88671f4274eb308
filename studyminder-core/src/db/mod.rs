//! Database layer for studyminder
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - Store-level uniqueness for daily reminders

pub mod repo;
pub mod schema;

pub use repo::{format_ts, Database, DeliveryStats};
