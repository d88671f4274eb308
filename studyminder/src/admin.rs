//! studyminder-admin - one-shot maintenance commands
//!
//! Runs a single batch job by hand (generation, delivery, metrics), shows
//! queue status, requeues dead-lettered notifications, and broadcasts a
//! message to every registered device.

mod process_lock;
mod setup;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::{acquire_job_guard, JobLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use studyminder_core::logging::{self, Console};
use studyminder_core::{
    Clock, DeliveryLoop, MetricsEngine, PushClient, PushMessage, ReminderGenerator, SystemClock,
};

#[derive(Parser)]
#[command(name = "studyminder-admin")]
#[command(about = "Maintenance commands for study reminders")]
#[command(version)]
struct Args {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate today's reminders now
    Generate,

    /// Deliver due notifications now
    Deliver {
        /// Log pushes instead of sending them
        #[arg(long)]
        dry_run: bool,

        /// Keep running batches until nothing is due
        #[arg(long)]
        all: bool,
    },

    /// Recompute learner metrics
    Recompute {
        /// Only this learner
        #[arg(long)]
        learner: Option<String>,
    },

    /// Show queue and schedule status
    Status,

    /// Put dead-lettered notifications back in the delivery queue
    Requeue {
        /// Only this learner
        #[arg(long)]
        learner: Option<String>,
    },

    /// Push a message to every enabled device
    Broadcast {
        #[arg(long)]
        title: String,

        #[arg(long)]
        body: String,

        /// Log pushes instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let ctx = setup::bootstrap("studyminder-admin", Console::Off)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let calendar = ctx
        .config
        .schedule
        .calendar()
        .context("invalid schedule.utc_offset_minutes")?;

    match args.command {
        Command::Generate => {
            let _guard = acquire_job_guard(JobLock::Generation, &ctx.db_path)?;
            let default_time = ctx
                .config
                .schedule
                .default_reminder_time()
                .context("invalid schedule.default_reminder_time")?;
            let generator = ReminderGenerator::new(ctx.db.clone(), clock, calendar, default_time);
            let report = generator
                .generate_for_today()
                .context("reminder generation failed")?;

            if args.json {
                print_json(&report)?;
            } else {
                if let Some(date) = report.date {
                    println!("Reminders for {}:", date);
                }
                println!("  created:            {}", report.created);
                println!("  not a study day:    {}", report.skipped_not_study_day);
                println!("  already scheduled:  {}", report.skipped_existing);
                println!("  failed:             {}", report.failed);
            }
        }

        Command::Deliver { dry_run, all } => {
            let _guard = acquire_job_guard(JobLock::Delivery, &ctx.db_path)?;
            let messenger = setup::messenger(&ctx.config, dry_run)?;
            let delivery =
                DeliveryLoop::new(ctx.db.clone(), messenger, clock, ctx.config.delivery.clone());

            let mut reports = Vec::new();
            loop {
                let report = delivery.deliver_due().await.context("delivery failed")?;
                let drained = report.selected < ctx.config.delivery.batch_size
                    || report.delivered == 0;
                reports.push(report);
                if !all || drained {
                    break;
                }
            }

            if args.json {
                print_json(&reports)?;
            } else {
                for (i, report) in reports.iter().enumerate() {
                    println!(
                        "Batch {}: {} selected, {} delivered, {} failed ({} dead-lettered), {} without device",
                        i + 1,
                        report.selected,
                        report.delivered,
                        report.failed,
                        report.dead_lettered,
                        report.skipped_no_device
                    );
                }
            }
        }

        Command::Recompute { learner } => {
            let _guard = acquire_job_guard(JobLock::Metrics, &ctx.db_path)?;
            let engine = MetricsEngine::new(ctx.db.clone(), clock, calendar);

            if let Some(learner_id) = learner {
                let snapshot = engine
                    .recompute_for_learner(&learner_id)
                    .with_context(|| format!("failed to recompute metrics for {}", learner_id))?;
                if args.json {
                    print_json(&snapshot)?;
                } else {
                    println!("Metrics for {}:", learner_id);
                    println!("  current streak:  {}", snapshot.current_streak);
                    println!("  max streak:      {}", snapshot.max_streak);
                    println!("  study days:      {}", snapshot.total_study_days);
                    println!("  items per day:   {:.2}", snapshot.avg_items_per_day);
                    println!("  correctness:     {:.2}%", snapshot.avg_correctness);
                }
            } else {
                let pb = if args.json {
                    ProgressBar::hidden()
                } else {
                    ProgressBar::new(0)
                };
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                        .context("invalid progress template")?
                        .progress_chars("#>-"),
                );
                let report = engine
                    .recompute_all_with_progress(|current, total, learner_id| {
                        pb.set_length(total as u64);
                        pb.set_position(current as u64);
                        pb.set_message(learner_id.to_string());
                    })
                    .context("metrics sweep failed")?;
                pb.finish_and_clear();
                if args.json {
                    print_json(&report)?;
                } else {
                    println!(
                        "Recomputed {} learner(s), {} failed in {}ms",
                        report.updated, report.failed, report.duration_ms
                    );
                    for learner_id in &report.failed_learners {
                        println!("  failed: {}", learner_id);
                    }
                }
            }
        }

        Command::Status => {
            let stats = ctx
                .db
                .get_delivery_stats()
                .context("failed to read delivery stats")?;
            let learners = ctx
                .db
                .list_active_learner_ids()
                .context("failed to list learners")?;
            let devices = ctx
                .db
                .list_deliverable_devices()
                .context("failed to list devices")?;
            let push_configured = ctx.config.push.is_ready();
            let push_reachable = if push_configured {
                let client = PushClient::new(ctx.config.push.clone())
                    .context("failed to create push client")?;
                Some(client.health_check().await.context("push health check failed")?)
            } else {
                None
            };
            let daemon_log = logging::log_file_path("studyminder-daemon");

            if args.json {
                #[derive(Serialize)]
                struct Status {
                    database: String,
                    active_learners: usize,
                    deliverable_devices: usize,
                    pending: i64,
                    delivered: i64,
                    dead_lettered: i64,
                    push_configured: bool,
                    push_reachable: Option<bool>,
                    auto_send_enabled: bool,
                    daemon_log: String,
                }
                print_json(&Status {
                    database: ctx.db_path.display().to_string(),
                    active_learners: learners.len(),
                    deliverable_devices: devices.len(),
                    pending: stats.pending,
                    delivered: stats.delivered,
                    dead_lettered: stats.dead_lettered,
                    push_configured,
                    push_reachable,
                    auto_send_enabled: ctx.config.schedule.auto_send_enabled,
                    daemon_log: daemon_log.display().to_string(),
                })?;
            } else {
                let schedule = &ctx.config.schedule;
                println!("Database: {}", ctx.db_path.display());
                println!("Learners: {} active, {} with a device", learners.len(), devices.len());
                println!("Notifications:");
                println!("  pending:        {}", stats.pending);
                println!("  delivered:      {}", stats.delivered);
                println!("  dead-lettered:  {}", stats.dead_lettered);
                println!("Schedule (UTC offset {} min):", schedule.utc_offset_minutes);
                println!("  generation:     daily at {:02}:00", schedule.generation_hour);
                if schedule.auto_send_enabled {
                    println!("  delivery:       every {}s", schedule.delivery_interval_secs);
                } else {
                    println!("  delivery:       disabled");
                }
                if schedule.metrics_sweep_enabled {
                    println!("  metrics sweep:  daily at {:02}:00", schedule.metrics_sweep_hour);
                } else {
                    println!("  metrics sweep:  disabled");
                }
                println!(
                    "Push gateway: {}",
                    match push_reachable {
                        Some(true) => "reachable",
                        Some(false) => "unreachable",
                        None => "not configured",
                    }
                );
                println!("Daemon log: {}", daemon_log.display());
            }
        }

        Command::Requeue { learner } => {
            let _guard = acquire_job_guard(JobLock::Delivery, &ctx.db_path)?;
            let count = ctx
                .db
                .requeue_dead_lettered(learner.as_deref())
                .context("failed to requeue notifications")?;
            tracing::info!(count, learner = ?learner, "Requeued dead-lettered notifications");
            if args.json {
                print_json(&serde_json::json!({ "requeued": count }))?;
            } else {
                println!("Requeued {} notification(s)", count);
            }
        }

        Command::Broadcast {
            title,
            body,
            dry_run,
        } => {
            let messenger = setup::messenger(&ctx.config, dry_run)?;
            let devices = ctx
                .db
                .list_deliverable_devices()
                .context("failed to list devices")?;
            let message = PushMessage::new(title, body);
            let items: Vec<(String, PushMessage)> = devices
                .into_iter()
                .map(|d| (d.token, message.clone()))
                .collect();

            let report = messenger
                .send_many(
                    &items,
                    Duration::from_millis(ctx.config.delivery.send_delay_ms),
                )
                .await;

            if args.json {
                print_json(&report)?;
            } else {
                println!(
                    "Broadcast to {} device(s): {} sent, {} failed",
                    items.len(),
                    report.success,
                    report.failed
                );
            }
        }
    }

    Ok(())
}
