//! studyminder-daemon - long-running driver for reminders, delivery, and metrics
//!
//! Runs reminder generation once per civil day, delivers due notifications
//! on a fixed interval, and sweeps learner metrics nightly. Stops cleanly on
//! Ctrl+C after in-flight batches finish.

mod process_lock;
mod setup;

use anyhow::{Context, Result};
use clap::Parser;
use process_lock::acquire_daemon_guard;
use std::sync::Arc;
use studyminder_core::logging::Console;
use studyminder_core::{Driver, SystemClock};

#[derive(Parser)]
#[command(name = "studyminder-daemon")]
#[command(about = "Run the study reminder scheduler")]
#[command(version)]
struct Args {
    /// Log pushes instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Do not deliver notifications, even if auto-send is enabled
    #[arg(long)]
    no_delivery: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut ctx = setup::bootstrap("studyminder-daemon", Console::Warnings)?;

    let _daemon_guard =
        acquire_daemon_guard(&ctx.db_path).context("failed to acquire process lock")?;

    if args.no_delivery {
        ctx.config.schedule.auto_send_enabled = false;
    }

    // Without auto-send the messenger is never used.
    let dry_run = args.dry_run || !ctx.config.schedule.auto_send_enabled;
    let messenger = setup::messenger(&ctx.config, dry_run)?;

    let driver = Arc::new(
        Driver::new(ctx.db.clone(), Arc::new(SystemClock), messenger, &ctx.config)
            .context("failed to build driver")?,
    );

    let shutdown = driver.shutdown_signal();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        signal.trigger();
    })
    .context("failed to set Ctrl+C handler")?;

    println!("Database: {}", ctx.db_path.display());
    for job in driver.job_statuses() {
        let state = if job.enabled { "" } else { " (disabled)" };
        println!("  {:<11} {}{}", job.name, job.schedule, state);
    }
    println!("Press Ctrl+C to stop");

    let handle = driver.start();
    shutdown.wait().await;

    println!("\nStopping, waiting for running jobs...");
    handle.shutdown().await;
    tracing::info!("studyminder-daemon stopped");
    println!("Stopped.");

    Ok(())
}
