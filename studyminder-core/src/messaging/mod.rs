//! Push messaging
//!
//! The delivery loop only sees the [`Messenger`] trait. Implementations:
//! - [`PushClient`]: HTTP push gateway
//! - [`LogMessenger`]: dry run, logs and succeeds
//!
//! ## Usage
//!
//! ```rust,ignore
//! use studyminder_core::messaging::{Messenger, PushClient, PushMessage};
//!
//! let client = PushClient::new(config.push.clone())?;
//! client.send(&token, &PushMessage::new("Hello", "Time to study")).await?;
//! ```

pub mod client;

pub use client::PushClient;

use crate::error::Result;
use crate::types::Notification;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Payload pushed to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    /// String key/value metadata delivered alongside the message
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    /// Add a metadata entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.data.insert(key.into(), value.to_string());
        self
    }

    /// Message for a stored notification, tagged with its id and type id.
    pub fn for_notification(notification: &Notification) -> Self {
        Self::new(&notification.title, &notification.body)
            .with_data("notification_id", notification.id)
            .with_data("type_id", notification.kind.id())
    }
}

/// Result of [`Messenger::send_many`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendManyReport {
    pub success: usize,
    pub failed: usize,
}

/// Something that can push a message to a device token.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Push one message. An `Err` means the message was not accepted.
    async fn send(&self, token: &str, message: &PushMessage) -> Result<()>;

    /// Push a batch, waiting `delay` between sends. Failures are counted,
    /// never propagated.
    async fn send_many(&self, items: &[(String, PushMessage)], delay: Duration) -> SendManyReport {
        let mut report = SendManyReport::default();
        for (i, (token, message)) in items.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.send(token, message).await {
                Ok(()) => report.success += 1,
                Err(e) => {
                    tracing::warn!(messenger = self.name(), error = %e, "Push failed");
                    report.failed += 1;
                }
            }
        }
        tracing::info!(
            messenger = self.name(),
            success = report.success,
            failed = report.failed,
            "Batch push complete"
        );
        report
    }
}

/// Dry-run messenger: logs every message and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, token: &str, message: &PushMessage) -> Result<()> {
        let token_prefix: String = token.chars().take(8).collect();
        tracing::info!(
            token = %token_prefix,
            title = %message.title,
            body = %message.body,
            data = ?message.data,
            "Dry-run push"
        );
        Ok(())
    }
}
