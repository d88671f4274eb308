//! Learner-facing operations.
//!
//! Each operation returns an [`ApiResponse`]: internal errors are logged and
//! reported as `success = false`, never propagated to the caller.

use crate::analytics::MetricsEngine;
use crate::calendar::CivilCalendar;
use crate::clock::Clock;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{DeviceRegistration, MetricsSnapshot, Notification, NotificationFeed};
use serde::Serialize;
use std::sync::Arc;

/// Number of notifications returned by [`ReminderService::list_notifications`].
pub const NOTIFICATION_FEED_LIMIT: usize = 50;

/// Uniform response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }

    /// Map an operation result, hiding internal error details.
    fn from_result(operation: &str, result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) if e.is_not_found() => Self::fail(e.to_string()),
            Err(e) => {
                tracing::error!(operation, error = %e, "Operation failed");
                Self::fail(format!("{} failed", operation))
            }
        }
    }
}

/// Outward operations over the store.
pub struct ReminderService {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    engine: MetricsEngine,
}

impl ReminderService {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, calendar: CivilCalendar) -> Self {
        let engine = MetricsEngine::new(db.clone(), clock.clone(), calendar);
        Self { db, clock, engine }
    }

    fn require_learner(&self, learner_id: &str) -> Result<()> {
        if self.db.learner_exists(learner_id)? {
            Ok(())
        } else {
            Err(Error::LearnerNotFound(learner_id.to_string()))
        }
    }

    /// Register the learner's push token; the latest registration wins.
    pub fn register_device(&self, learner_id: &str, token: &str) -> ApiResponse<DeviceRegistration> {
        let token = token.trim();
        if token.is_empty() {
            return ApiResponse::fail("device token must not be empty");
        }

        let result: Result<DeviceRegistration> = (|| {
            self.require_learner(learner_id)?;
            self.db.upsert_device(learner_id, token, self.clock.now())?;
            self.db
                .get_device(learner_id)?
                .ok_or_else(|| Error::LearnerNotFound(learner_id.to_string()))
        })();

        if result.is_ok() {
            tracing::info!(learner_id, "Device registered");
        }
        ApiResponse::from_result("register_device", result)
    }

    /// Turn pushes on or off without forgetting the token.
    pub fn set_device_enabled(
        &self,
        learner_id: &str,
        enabled: bool,
    ) -> ApiResponse<DeviceRegistration> {
        let result: Result<Option<DeviceRegistration>> = (|| {
            self.require_learner(learner_id)?;
            if !self.db.set_device_enabled(learner_id, enabled, self.clock.now())? {
                return Ok(None);
            }
            self.db.get_device(learner_id)
        })();

        match result {
            Ok(Some(device)) => ApiResponse::ok(device),
            Ok(None) => ApiResponse::fail(format!("no device registered for {}", learner_id)),
            Err(e) => ApiResponse::from_result("set_device_enabled", Err(e)),
        }
    }

    /// The learner's metrics, computed now if no snapshot exists yet.
    pub fn get_metrics(&self, learner_id: &str) -> ApiResponse<MetricsSnapshot> {
        let result: Result<MetricsSnapshot> = (|| {
            self.require_learner(learner_id)?;
            match self.db.get_metrics(learner_id)? {
                Some(snapshot) => Ok(snapshot),
                None => self.engine.recompute_for_learner(learner_id),
            }
        })();
        ApiResponse::from_result("get_metrics", result)
    }

    /// The 50 most recent notifications plus the unread count.
    pub fn list_notifications(&self, learner_id: &str) -> ApiResponse<NotificationFeed> {
        let result: Result<NotificationFeed> = (|| {
            self.require_learner(learner_id)?;
            Ok(NotificationFeed {
                notifications: self
                    .db
                    .list_recent_notifications(learner_id, NOTIFICATION_FEED_LIMIT)?,
                unread_count: self.db.count_unread(learner_id)?,
            })
        })();
        ApiResponse::from_result("list_notifications", result)
    }

    /// Mark one of the learner's notifications read.
    pub fn mark_read(&self, learner_id: &str, notification_id: i64) -> ApiResponse<Notification> {
        let result: Result<Notification> = (|| {
            if !self
                .db
                .mark_read(learner_id, notification_id, self.clock.now())?
            {
                return Err(Error::NotificationNotFound(notification_id));
            }
            self.db
                .get_notification(notification_id)?
                .ok_or(Error::NotificationNotFound(notification_id))
        })();
        ApiResponse::from_result("mark_read", result)
    }

    /// Record that the learner acted on one of their notifications.
    pub fn mark_action_taken(
        &self,
        learner_id: &str,
        notification_id: i64,
    ) -> ApiResponse<Notification> {
        let result: Result<Notification> = (|| {
            if !self
                .db
                .mark_action_taken(learner_id, notification_id, self.clock.now())?
            {
                return Err(Error::NotificationNotFound(notification_id));
            }
            self.db
                .get_notification(notification_id)?
                .ok_or(Error::NotificationNotFound(notification_id))
        })();
        ApiResponse::from_result("mark_action_taken", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::{InsertOutcome, LearnerPreference, NewNotification, NotificationKind};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn service() -> (Arc<Database>, ReminderService) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        db.upsert_learner(&LearnerPreference::new("l1", "Ana"), now)
            .unwrap();
        db.upsert_learner(&LearnerPreference::new("l2", "Bo"), now)
            .unwrap();
        let clock = Arc::new(ManualClock::new(now));
        let service = ReminderService::new(db.clone(), clock, CivilCalendar::utc());
        (db, service)
    }

    fn notify(db: &Database, learner_id: &str, day: u32) -> i64 {
        let outcome = db
            .insert_notification(&NewNotification {
                learner_id: learner_id.to_string(),
                kind: NotificationKind::Reminder,
                title: "t".to_string(),
                body: "b".to_string(),
                scheduled_for: Utc.with_ymd_and_hms(2026, 3, day, 19, 0, 0).unwrap(),
                scheduled_date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
                created_at: Utc.with_ymd_and_hms(2026, 3, day, 6, 0, 0).unwrap(),
            })
            .unwrap();
        match outcome {
            InsertOutcome::Created(id) => id,
            InsertOutcome::AlreadyExists => panic!("duplicate fixture"),
        }
    }

    #[test]
    fn test_register_device_rejects_blank_token() {
        let (_db, service) = service();
        let response = service.register_device("l1", "   ");
        assert!(!response.success);
        assert!(response.data.is_none());
    }

    #[test]
    fn test_register_device_latest_wins() {
        let (_db, service) = service();
        assert!(service.register_device("l1", "first").success);
        let response = service.register_device("l1", " second ");
        assert!(response.success);
        assert_eq!(response.data.unwrap().token, "second");

        let unknown = service.register_device("ghost", "tok");
        assert!(!unknown.success);
        assert_eq!(unknown.message.as_deref(), Some("learner not found: ghost"));
    }

    #[test]
    fn test_set_device_enabled() {
        let (_db, service) = service();
        assert!(!service.set_device_enabled("l1", false).success);

        service.register_device("l1", "tok");
        let response = service.set_device_enabled("l1", false);
        assert!(response.success);
        assert!(!response.data.unwrap().enabled);
    }

    #[test]
    fn test_get_metrics_computes_on_demand() {
        let (db, service) = service();
        assert!(db.get_metrics("l1").unwrap().is_none());

        let response = service.get_metrics("l1");
        assert!(response.success);
        assert_eq!(response.data.unwrap().current_streak, 0);
        assert!(db.get_metrics("l1").unwrap().is_some());

        assert!(!service.get_metrics("ghost").success);
    }

    #[test]
    fn test_list_notifications_and_unread_count() {
        let (db, service) = service();
        notify(&db, "l1", 2);
        let newest = notify(&db, "l1", 3);
        notify(&db, "l2", 3);

        let feed = service.list_notifications("l1").data.unwrap();
        assert_eq!(feed.notifications.len(), 2);
        assert_eq!(feed.notifications[0].id, newest);
        assert_eq!(feed.unread_count, 2);
    }

    #[test]
    fn test_mark_read_and_action_scoped_to_owner() {
        let (db, service) = service();
        let id = notify(&db, "l1", 2);

        let foreign = service.mark_read("l2", id);
        assert!(!foreign.success);
        assert_eq!(
            foreign.message.as_deref(),
            Some(format!("notification not found: {}", id).as_str())
        );

        let response = service.mark_read("l1", id);
        assert!(response.success);
        assert!(response.data.unwrap().read);

        let response = service.mark_action_taken("l1", id);
        assert!(response.data.unwrap().action_taken);
        assert!(!service.mark_action_taken("l1", 9999).success);
        assert_eq!(service.list_notifications("l1").data.unwrap().unread_count, 0);
    }

    #[test]
    fn test_response_serialization_skips_empty_fields() {
        let response: ApiResponse<i32> = ApiResponse::fail("nope");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "message": "nope"}));
    }
}
