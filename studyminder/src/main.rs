//! studyminder - learner-facing operations
//!
//! Each command prints the structured JSON response
//! (`{"success": ..., "data": ..., "message": ...}`) and exits non-zero when
//! the operation did not succeed.

mod setup;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use studyminder_core::logging::Console;
use studyminder_core::{
    ApiResponse, Clock, Database, DeviceRegistration, Messenger, PushMessage, ReminderService,
    SystemClock,
};

#[derive(Parser)]
#[command(name = "studyminder")]
#[command(about = "Study reminders and progress for a learner")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register (or replace) the learner's push token
    RegisterDevice { learner: String, token: String },

    /// Turn pushes on or off for the learner's device
    Device {
        learner: String,

        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        #[arg(long)]
        disable: bool,
    },

    /// Show streaks and study averages
    Metrics { learner: String },

    /// List recent notifications and the unread count
    Notifications { learner: String },

    /// Mark a notification as read
    Read { learner: String, id: i64 },

    /// Record that the learner acted on a notification
    Act { learner: String, id: i64 },

    /// Send a test push to the learner's device
    PushTest {
        learner: String,

        /// Log the push instead of sending it
        #[arg(long)]
        dry_run: bool,
    },
}

/// Print the response and report whether it succeeded.
fn emit<T: Serialize>(response: &ApiResponse<T>) -> Result<bool> {
    println!(
        "{}",
        serde_json::to_string_pretty(response).context("failed to serialize response")?
    );
    Ok(response.success)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let ctx = setup::bootstrap("studyminder", Console::Off)?;
    let calendar = ctx
        .config
        .schedule
        .calendar()
        .context("invalid schedule.utc_offset_minutes")?;
    let service = ReminderService::new(ctx.db.clone(), Arc::new(SystemClock), calendar);

    let success = match args.command {
        Command::RegisterDevice { learner, token } => {
            emit(&service.register_device(&learner, &token))?
        }
        Command::Device {
            learner,
            enable,
            disable,
        } => {
            if !enable && !disable {
                anyhow::bail!("pass --enable or --disable");
            }
            emit(&service.set_device_enabled(&learner, enable))?
        }
        Command::Metrics { learner } => emit(&service.get_metrics(&learner))?,
        Command::Notifications { learner } => emit(&service.list_notifications(&learner))?,
        Command::Read { learner, id } => emit(&service.mark_read(&learner, id))?,
        Command::Act { learner, id } => emit(&service.mark_action_taken(&learner, id))?,
        Command::PushTest { learner, dry_run } => {
            let messenger = setup::messenger(&ctx.config, dry_run)?;
            let response = push_test(&ctx.db, messenger.as_ref(), &learner).await;
            emit(&response)?
        }
    };

    if !success {
        // Flush the log writer before exiting.
        drop(service);
        drop(ctx);
        std::process::exit(1);
    }
    Ok(())
}

async fn push_test(
    db: &Database,
    messenger: &dyn Messenger,
    learner_id: &str,
) -> ApiResponse<DeviceRegistration> {
    let device = match db.get_device(learner_id) {
        Ok(Some(device)) => device,
        Ok(None) => return ApiResponse::fail(format!("no device registered for {}", learner_id)),
        Err(e) => {
            tracing::error!(learner_id, error = %e, "Failed to load device");
            return ApiResponse::fail("push_test failed");
        }
    };
    if !device.enabled {
        return ApiResponse::fail(format!("pushes are disabled for {}", learner_id));
    }

    let message = PushMessage::new("studyminder", "Test notification")
        .with_data("type", "test")
        .with_data("sent_at", SystemClock.now().to_rfc3339());

    match messenger.send(&device.token, &message).await {
        Ok(()) => {
            tracing::info!(learner_id, messenger = messenger.name(), "Test push sent");
            ApiResponse::ok_with_message(device, format!("test push sent via {}", messenger.name()))
        }
        Err(e) => {
            tracing::warn!(learner_id, error = %e, "Test push failed");
            ApiResponse::fail(format!("test push failed: {}", e))
        }
    }
}
