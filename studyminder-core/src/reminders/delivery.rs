//! Notification delivery loop.
//!
//! Each run takes a bounded batch of due notifications, oldest first, and
//! pushes each one to the learner's registered device. A failed push leaves
//! the notification pending; after `max_retries` failed attempts it is
//! dead-lettered and no longer selected. Notifications whose learner has no
//! usable device are skipped without recording an attempt.

use crate::clock::Clock;
use crate::config::DeliveryConfig;
use crate::db::Database;
use crate::error::Result;
use crate::messaging::{Messenger, PushMessage};
use crate::scheduler::Shutdown;
use crate::types::Notification;
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one delivery run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Notifications selected for this run
    pub selected: usize,
    pub delivered: usize,
    /// Push attempts that failed (includes dead-lettered)
    pub failed: usize,
    /// Failures that exhausted the retry budget
    pub dead_lettered: usize,
    /// No device, device disabled, or blank token
    pub skipped_no_device: usize,
    /// Stopped early because shutdown was requested
    pub interrupted: bool,
    pub duration_ms: i64,
}

enum ItemOutcome {
    Delivered,
    Failed { dead_lettered: bool },
    NoDevice,
}

/// Pushes due notifications through a [`Messenger`].
pub struct DeliveryLoop {
    db: Arc<Database>,
    messenger: Arc<dyn Messenger>,
    clock: Arc<dyn Clock>,
    config: DeliveryConfig,
    shutdown: Option<Shutdown>,
}

impl DeliveryLoop {
    pub fn new(
        db: Arc<Database>,
        messenger: Arc<dyn Messenger>,
        clock: Arc<dyn Clock>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            db,
            messenger,
            clock,
            config,
            shutdown: None,
        }
    }

    /// Stop between notifications once `shutdown` is triggered.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|s| s.is_triggered())
    }

    /// Deliver one batch of due notifications.
    ///
    /// Fails only when the batch itself cannot be selected; per-notification
    /// errors are logged and counted.
    pub async fn deliver_due(&self) -> Result<DeliveryReport> {
        let start = Instant::now();
        let now = self.clock.now();
        let retry_before = now - Duration::minutes(self.config.retry_delay_minutes);

        let due = self
            .db
            .list_due_notifications(now, retry_before, self.config.batch_size)?;

        let mut report = DeliveryReport {
            selected: due.len(),
            ..Default::default()
        };
        let send_delay = std::time::Duration::from_millis(self.config.send_delay_ms);
        let mut pushed_any = false;

        for notification in &due {
            if self.shutdown_requested() {
                tracing::info!(
                    remaining = due.len() - report.delivered - report.failed - report.skipped_no_device,
                    "Shutdown requested, stopping delivery"
                );
                report.interrupted = true;
                break;
            }

            if pushed_any && !send_delay.is_zero() {
                tokio::time::sleep(send_delay).await;
            }

            match self.deliver_one(notification).await {
                Ok(ItemOutcome::Delivered) => {
                    pushed_any = true;
                    report.delivered += 1;
                }
                Ok(ItemOutcome::Failed { dead_lettered }) => {
                    pushed_any = true;
                    report.failed += 1;
                    if dead_lettered {
                        report.dead_lettered += 1;
                    }
                }
                Ok(ItemOutcome::NoDevice) => report.skipped_no_device += 1,
                Err(e) => {
                    tracing::error!(
                        notification_id = notification.id,
                        error = %e,
                        "Delivery bookkeeping failed"
                    );
                    report.failed += 1;
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as i64;
        tracing::info!(
            selected = report.selected,
            delivered = report.delivered,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            skipped_no_device = report.skipped_no_device,
            duration_ms = report.duration_ms,
            "Delivery run complete"
        );
        Ok(report)
    }

    async fn deliver_one(&self, notification: &Notification) -> Result<ItemOutcome> {
        // Selection only returns rows with a usable device; it may have
        // been disabled or removed since.
        let device = match self.db.get_device(&notification.learner_id)? {
            Some(device) if device.is_deliverable() => device,
            _ => {
                tracing::debug!(
                    notification_id = notification.id,
                    learner_id = %notification.learner_id,
                    "No deliverable device, skipping"
                );
                return Ok(ItemOutcome::NoDevice);
            }
        };

        let message = PushMessage::for_notification(notification);
        match self.messenger.send(&device.token, &message).await {
            Ok(()) => {
                self.db.mark_delivered(notification.id, self.clock.now())?;
                Ok(ItemOutcome::Delivered)
            }
            Err(e) => {
                let dead_lettered = self.db.record_delivery_failure(
                    notification.id,
                    self.clock.now(),
                    &e.to_string(),
                    self.config.max_retries,
                )?;
                if dead_lettered {
                    tracing::warn!(
                        notification_id = notification.id,
                        learner_id = %notification.learner_id,
                        attempts = notification.delivery_attempts + 1,
                        error = %e,
                        "Delivery failed, giving up"
                    );
                } else {
                    tracing::warn!(
                        notification_id = notification.id,
                        learner_id = %notification.learner_id,
                        attempts = notification.delivery_attempts + 1,
                        error = %e,
                        "Delivery failed, will retry"
                    );
                }
                Ok(ItemOutcome::Failed { dead_lettered })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Error;
    use crate::types::{InsertOutcome, LearnerPreference, NewNotification, NotificationKind};
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use std::sync::Mutex;

    /// Records sent tokens; fails every send while `fail` is set.
    #[derive(Default)]
    struct FakeMessenger {
        sent: Mutex<Vec<(String, PushMessage)>>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl Messenger for FakeMessenger {
        fn name(&self) -> &str {
            "fake"
        }

        async fn send(&self, token: &str, message: &PushMessage) -> Result<()> {
            if *self.fail.lock().unwrap() {
                return Err(Error::Messaging("gateway down".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((token.to_string(), message.clone()));
            Ok(())
        }
    }

    fn config() -> DeliveryConfig {
        DeliveryConfig {
            batch_size: 50,
            max_retries: 3,
            retry_delay_minutes: 15,
            send_delay_ms: 0,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    struct Fixture {
        db: Arc<Database>,
        clock: Arc<ManualClock>,
        messenger: Arc<FakeMessenger>,
        delivery: DeliveryLoop,
    }

    fn fixture(config: DeliveryConfig) -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        db.upsert_learner(&LearnerPreference::new("l1", "Ana"), now()).unwrap();
        let clock = Arc::new(ManualClock::new(now()));
        let messenger = Arc::new(FakeMessenger::default());
        let delivery = DeliveryLoop::new(db.clone(), messenger.clone(), clock.clone(), config);
        Fixture {
            db,
            clock,
            messenger,
            delivery,
        }
    }

    fn queue(db: &Database, day: u32, kind: NotificationKind) -> i64 {
        queue_for(db, "l1", day, kind)
    }

    fn queue_for(db: &Database, learner_id: &str, day: u32, kind: NotificationKind) -> i64 {
        let outcome = db
            .insert_notification(&NewNotification {
                learner_id: learner_id.to_string(),
                kind,
                title: "Time to study!".to_string(),
                body: "Ana, go".to_string(),
                scheduled_for: Utc.with_ymd_and_hms(2026, 3, day, 0, 0, 0).unwrap(),
                scheduled_date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
                created_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            })
            .unwrap();
        match outcome {
            InsertOutcome::Created(id) => id,
            InsertOutcome::AlreadyExists => panic!("duplicate fixture"),
        }
    }

    #[tokio::test]
    async fn test_delivers_due_with_metadata() {
        let f = fixture(config());
        f.db.upsert_device("l1", "tok-1", now()).unwrap();
        let id = queue(&f.db, 9, NotificationKind::Reminder);
        let future = queue(&f.db, 20, NotificationKind::Reminder);

        let report = f.delivery.deliver_due().await.unwrap();
        assert_eq!(report.selected, 1);
        assert_eq!(report.delivered, 1);

        let sent = f.messenger.sent.lock().unwrap();
        assert_eq!(sent[0].0, "tok-1");
        assert_eq!(sent[0].1.data["notification_id"], id.to_string());
        assert_eq!(sent[0].1.data["type_id"], "1");

        let stored = f.db.get_notification(id).unwrap().unwrap();
        assert!(stored.delivered);
        assert_eq!(stored.delivered_at, Some(now()));
        assert!(!f.db.get_notification(future).unwrap().unwrap().delivered);
    }

    #[tokio::test]
    async fn test_failure_leaves_pending_until_retry_window() {
        let f = fixture(config());
        f.db.upsert_device("l1", "tok-1", now()).unwrap();
        let id = queue(&f.db, 9, NotificationKind::Reminder);
        *f.messenger.fail.lock().unwrap() = true;

        let report = f.delivery.deliver_due().await.unwrap();
        assert_eq!(report.failed, 1);
        let stored = f.db.get_notification(id).unwrap().unwrap();
        assert!(!stored.delivered);
        assert_eq!(stored.delivery_attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("messaging error: gateway down"));

        // Inside the retry window nothing is selected.
        *f.messenger.fail.lock().unwrap() = false;
        assert_eq!(f.delivery.deliver_due().await.unwrap().selected, 0);

        f.clock.advance(Duration::minutes(15));
        let report = f.delivery.deliver_due().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(f.db.get_notification(id).unwrap().unwrap().delivered);
    }

    #[tokio::test]
    async fn test_dead_letter_after_max_retries() {
        let f = fixture(config());
        f.db.upsert_device("l1", "revoked", now()).unwrap();
        let id = queue(&f.db, 9, NotificationKind::Reminder);
        *f.messenger.fail.lock().unwrap() = true;

        let mut dead = 0;
        for _ in 0..5 {
            dead += f.delivery.deliver_due().await.unwrap().dead_lettered;
            f.clock.advance(Duration::minutes(16));
        }

        assert_eq!(dead, 1);
        let stored = f.db.get_notification(id).unwrap().unwrap();
        assert!(stored.dead_lettered);
        assert_eq!(stored.delivery_attempts, 3);
    }

    #[tokio::test]
    async fn test_unusable_device_keeps_notification_pending() {
        let f = fixture(config());
        let id = queue(&f.db, 9, NotificationKind::Reminder);

        assert_eq!(f.delivery.deliver_due().await.unwrap().selected, 0);

        f.db.upsert_device("l1", "tok-1", now()).unwrap();
        f.db.set_device_enabled("l1", false, now()).unwrap();
        assert_eq!(f.delivery.deliver_due().await.unwrap().selected, 0);

        f.db.upsert_device("l1", "   ", now()).unwrap();
        assert_eq!(f.delivery.deliver_due().await.unwrap().selected, 0);

        let stored = f.db.get_notification(id).unwrap().unwrap();
        assert_eq!(stored.delivery_attempts, 0);
        assert!(!stored.delivered);
        assert!(f.messenger.sent.lock().unwrap().is_empty());

        f.db.upsert_device("l1", "tok-2", now()).unwrap();
        let report = f.delivery.deliver_due().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped_no_device, 0);
        assert!(f.db.get_notification(id).unwrap().unwrap().delivered);
    }

    #[tokio::test]
    async fn test_learners_without_device_do_not_block_queue() {
        let mut cfg = config();
        cfg.batch_size = 3;
        let f = fixture(cfg);
        f.db.upsert_learner(&LearnerPreference::new("l2", "Bo"), now())
            .unwrap();
        f.db.upsert_device("l1", "tok-1", now()).unwrap();
        // More undeliverable rows than one batch, all older than l1's reminder.
        let stuck: Vec<i64> = (2..6)
            .map(|day| queue_for(&f.db, "l2", day, NotificationKind::Other(4)))
            .collect();
        let ready = queue(&f.db, 9, NotificationKind::Reminder);

        let mut delivered = 0;
        for _ in 0..10 {
            delivered += f.delivery.deliver_due().await.unwrap().delivered;
            f.clock.advance(Duration::hours(1));
        }

        assert_eq!(delivered, 1);
        assert!(f.db.get_notification(ready).unwrap().unwrap().delivered);
        for id in &stuck {
            let stored = f.db.get_notification(*id).unwrap().unwrap();
            assert!(!stored.delivered);
            assert_eq!(stored.delivery_attempts, 0);
        }

        f.db.upsert_device("l2", "tok-2", f.clock.now()).unwrap();
        let first = f.delivery.deliver_due().await.unwrap();
        let second = f.delivery.deliver_due().await.unwrap();
        assert_eq!(first.delivered + second.delivered, stuck.len());
    }

    #[tokio::test]
    async fn test_batch_size_and_order() {
        let mut cfg = config();
        cfg.batch_size = 2;
        let f = fixture(cfg);
        f.db.upsert_device("l1", "tok-1", now()).unwrap();
        let other_day_8 = queue(&f.db, 8, NotificationKind::Other(4));
        let reminder_9 = queue(&f.db, 9, NotificationKind::Reminder);
        let other_day_7 = queue(&f.db, 7, NotificationKind::Other(4));

        let report = f.delivery.deliver_due().await.unwrap();
        assert_eq!(report.delivered, 2);
        let sent = f.messenger.sent.lock().unwrap();
        let ids: Vec<String> = sent
            .iter()
            .map(|(_, m)| m.data["notification_id"].clone())
            .collect();
        assert_eq!(ids, vec![other_day_7.to_string(), other_day_8.to_string()]);
        assert!(!f.db.get_notification(reminder_9).unwrap().unwrap().delivered);
    }

    #[tokio::test]
    async fn test_shutdown_stops_batch() {
        let f = fixture(config());
        f.db.upsert_device("l1", "tok-1", now()).unwrap();
        queue(&f.db, 9, NotificationKind::Reminder);
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let delivery = f.delivery.with_shutdown(shutdown);
        let report = delivery.deliver_due().await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.delivered, 0);
    }
}
