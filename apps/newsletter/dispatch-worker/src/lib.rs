//! Newsletter Dispatch Worker
//!
//! Polls for published content and notifies subscribers through the
//! configured email providers.
//!
//! ## Architecture
//!
//! ```text
//! PostgreSQL (contents, subscriptions)
//!   ↓ (every SCHEDULER_INTERVAL_SECS)
//! Scheduler
//!   ↓
//! Dispatcher ── ProviderRegistry ── SMTP / SendGrid / Mailtrap / generic API
//!   ↓
//! PostgreSQL (email_logs)
//! ```
//!
//! ## Features
//!
//! - Provider set and balancing strategy from a TOML file
//! - Optional schema migration on startup
//! - Graceful shutdown: in-flight sends finish, batched mail is flushed

use core_config::{ConfigError, Environment, FromEnv, database::DatabaseConfig, env_or_default, env_parse_or};
use domain_notifications::{
    Dispatcher, NotificationsConfig, PgContentRepository, PgDeliveryLogRepository,
    PgSubscriberRepository, ProviderRegistry, Scheduler,
};
use eyre::{Result, WrapErr};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Process-level settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Path of the provider/dispatch TOML file
    pub config_path: String,
    pub run_migrations: bool,
    pub tick_interval: Duration,
    pub retry_enabled: bool,
}

impl FromEnv for WorkerSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let interval_secs: u64 = env_parse_or("SCHEDULER_INTERVAL_SECS", 60)?;
        if interval_secs == 0 {
            return Err(ConfigError::ParseError {
                key: "SCHEDULER_INTERVAL_SECS".to_string(),
                details: "must be at least 1 second".to_string(),
            });
        }

        Ok(Self {
            config_path: env_or_default("NEWSLETTER_CONFIG", "config/default.toml"),
            run_migrations: env_parse_or("RUN_MIGRATIONS", false)?,
            tick_interval: Duration::from_secs(interval_secs),
            retry_enabled: env_parse_or("RETRY_ENABLED", true)?,
        })
    }
}

async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(1)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.connect_timeout)
        .sqlx_logging(false);

    let db = Database::connect(options)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;
    info!("Connected to PostgreSQL");
    Ok(db)
}

/// Run the dispatch worker until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if:
/// - the environment or provider configuration is invalid
/// - no provider could be built
/// - PostgreSQL is unreachable or a migration fails
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting newsletter dispatch worker"
    );

    let settings = WorkerSettings::from_env().wrap_err("Invalid worker settings")?;
    let config = NotificationsConfig::load(&settings.config_path)
        .wrap_err_with(|| format!("Failed to load {}", settings.config_path))?;

    let db_config = DatabaseConfig::from_env().wrap_err("Failed to load database configuration")?;
    let db = connect(&db_config).await?;

    if settings.run_migrations {
        info!("Running migrations...");
        Migrator::up(&db, None)
            .await
            .wrap_err("Failed to run migrations")?;
    }

    let registry = Arc::new(
        ProviderRegistry::from_config(&config.providers, &config.worker)
            .wrap_err("Failed to initialize email providers")?,
    );

    let dispatcher = Dispatcher::new(
        registry.clone(),
        Arc::new(PgContentRepository::new(db.clone())),
        Arc::new(PgSubscriberRepository::new(db.clone())),
        Arc::new(PgDeliveryLogRepository::new(db)),
        config.worker,
    );

    let scheduler = Scheduler::new(Arc::new(dispatcher))
        .with_interval(settings.tick_interval)
        .with_retry(settings.retry_enabled);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = shutdown_signal().await {
                error!("Error waiting for shutdown signal: {}", e);
            }
            cancel.cancel();
        }
    });

    scheduler.run(cancel).await;

    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Some providers did not shut down cleanly");
    }

    info!("Newsletter dispatch worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
