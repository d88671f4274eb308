//! Startup shared by the studyminder binaries.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/studyminder/data.db (~/.local/share/studyminder/data.db)
//! - Logs: $XDG_STATE_HOME/studyminder/<binary>.log (~/.local/state/studyminder/)
//! - Config: $XDG_CONFIG_HOME/studyminder/config.toml (~/.config/studyminder/config.toml)

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use studyminder_core::logging::{Console, LoggingGuard};
use studyminder_core::{Config, Database, LogMessenger, Messenger, PushClient};

/// Loaded configuration, open database, and live logging.
pub struct AppContext {
    pub config: Config,
    pub db: Arc<Database>,
    pub db_path: PathBuf,
    _log_guard: LoggingGuard,
}

/// Load config, start logging, and open the migrated database.
pub fn bootstrap(binary: &str, console: Console) -> Result<AppContext> {
    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let log_guard = studyminder_core::logging::init(&config.logging, binary, console)
        .context("failed to initialize logging")?;

    tracing::info!(binary, "studyminder starting");

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    Ok(AppContext {
        config,
        db: Arc::new(db),
        db_path,
        _log_guard: log_guard,
    })
}

/// Pick the messenger: the push gateway when configured, the logging dry run
/// when asked for.
pub fn messenger(config: &Config, dry_run: bool) -> Result<Arc<dyn Messenger>> {
    if dry_run {
        tracing::info!("Dry run: pushes are logged, not sent");
        return Ok(Arc::new(LogMessenger));
    }
    if !config.push.is_ready() {
        anyhow::bail!(
            "push is not configured: set [push] enabled, server_url and api_key in {}, or pass --dry-run",
            Config::config_path().display()
        );
    }
    let client = PushClient::new(config.push.clone()).context("failed to create push client")?;
    Ok(Arc::new(client))
}
