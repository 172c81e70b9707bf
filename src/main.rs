//! Housekeeper Service
//!
//! Runs the maintenance scheduler against the configured store and serves
//! the admin surface over HTTP.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use common::auth::{AdminAuthorizer, StaticTokenAuthorizer};
use common::cache::InMemoryQueryCache;
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use common::store::{RelationalStore, SqlStore};
use maintenance::{
    AdminSurface, MaintenanceEngine, MaintenanceScheduler, PolicyRegistry, register_standard_jobs,
};
use router::{AppState, create_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Parser)]
#[command(name = "housekeeper")]
#[command(about = "Housekeeper - retention, partitioning and maintenance for relational stores")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<CommonCommands>,
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

/// Checks that need the maintenance types: policies and timezone.
fn validate_maintenance_config(config: &Configuration) -> Result<()> {
    let registry =
        PolicyRegistry::new(&config.retention).context("Invalid retention configuration")?;
    MaintenanceScheduler::new(&config.scheduler, maintenance::MaintenanceMetrics::new())
        .context("Invalid scheduler configuration")?;
    log::info!("{} retention policies registered", registry.len());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    let command = cli.command.unwrap_or_default();
    if matches!(command, CommonCommands::Validate) {
        validate_maintenance_config(&config)?;
    }
    if utils::handle_common_command(&command, &config).await? {
        return Ok(());
    }

    utils::validate_config(&config)?;
    validate_maintenance_config(&config)?;

    log::info!("Starting Housekeeper");

    let store: Arc<dyn RelationalStore> = Arc::new(
        SqlStore::connect(&config.database)
            .await
            .context("Failed to connect to the store database")?,
    );
    store
        .ping()
        .await
        .context("Store database is not reachable")?;

    let cache = Arc::new(InMemoryQueryCache::new(&config.cache));
    let engine = Arc::new(
        MaintenanceEngine::new(&config, store, cache).context("Invalid retention configuration")?,
    );

    let mut scheduler = MaintenanceScheduler::new(&config.scheduler, engine.metrics().clone())
        .context("Invalid scheduler configuration")?;
    register_standard_jobs(&mut scheduler, engine.clone(), &config.scheduler, Utc::now())
        .context("Invalid scheduler configuration")?;
    let scheduler = Arc::new(scheduler);

    let scheduler_handle = if config.scheduler.enabled {
        Some(scheduler.clone().start())
    } else {
        log::warn!("Scheduler disabled; maintenance runs only through the admin surface");
        None
    };

    let authorizer: Arc<dyn AdminAuthorizer> = Arc::new(StaticTokenAuthorizer::new(&config.admin));
    let admin = AdminSurface::new(engine.clone(), scheduler);
    let app = create_router(AppState::new(admin, authorizer));

    let http_addr: SocketAddr = config
        .admin
        .bind_addr
        .parse()
        .context("Invalid admin bind address")?;
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("Failed to bind admin surface on {http_addr}"))?;
    log::info!("Admin surface listening on {}", listener.local_addr()?);

    let (http_shutdown_tx, http_shutdown_rx) = oneshot::channel::<()>();
    let http_handle = tokio::spawn(async move {
        let result = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                http_shutdown_rx.await.ok();
                log::info!("Admin surface shutting down gracefully");
            })
            .await;
        if let Err(e) = result {
            log::error!("Admin surface error: {e}");
        }
    });

    log::info!("Housekeeper started successfully");

    wait_for_shutdown_signal().await?;

    log::info!("Shutting down Housekeeper...");

    if let Some(handle) = scheduler_handle {
        handle.abort();
    }
    let _ = http_shutdown_tx.send(());
    let _ = http_handle.await;

    engine.metrics().summary().log();
    log::info!("Housekeeper stopped");

    Ok(())
}
