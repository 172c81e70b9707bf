use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line arguments of the housekeeper service
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, Default)]
pub enum CommonCommands {
    /// Start the scheduler and admin surface (default behavior)
    #[default]
    Start,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use std::net::SocketAddr;
    use tracing_subscriber::EnvFilter;

    /// Initialize logging; `RUST_LOG` wins over the CLI flags when set
    pub fn init_logging(args: &CommonArgs) {
        let level = if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("Housekeeper Configuration:");
            println!("==========================");
            println!("Database DSN: {}", config.database.dsn);
            println!("Statement timeout: {:?}", config.database.statement_timeout);
            println!("Admin bind address: {}", config.admin.bind_addr);
            println!("Admin tokens: {}", config.admin.tokens.len());

            if config.scheduler.enabled {
                println!(
                    "Scheduler: enabled (tick {:?}, timezone {})",
                    config.scheduler.tick_interval, config.scheduler.timezone
                );
            } else {
                println!("Scheduler: disabled");
            }

            println!(
                "Retention: {} policies, batch size {}{}",
                config.retention.policies.len(),
                config.retention.batch_size,
                if config.retention.dry_run { " (dry run)" } else { "" }
            );
            for policy in &config.retention.policies {
                println!(
                    "  {} -> {} after {} ({} sweep)",
                    policy.entity_type,
                    policy.strategy,
                    humantime::format_duration(policy.retention),
                    format!("{:?}", policy.sweep).to_lowercase()
                );
            }
            println!("Partitioned entities: {}", config.partitions.len());
            println!("Materialized views: {}", config.materialized_views.len());
            println!(
                "File cleanup: {}",
                if config.files.enabled { "enabled" } else { "disabled" }
            );
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if config.database.dsn.is_empty() {
            anyhow::bail!("Database DSN cannot be empty");
        }

        config
            .admin
            .bind_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid admin bind address '{}'", config.admin.bind_addr))?;

        if config.retention.batch_size == 0 {
            anyhow::bail!("Retention batch size must be greater than zero");
        }

        if config.files.enabled && config.files.batch_size == 0 {
            anyhow::bail!("File cleanup batch size must be greater than zero");
        }

        let scheduler = &config.scheduler;
        for (name, hour) in [
            ("daily_hour", scheduler.daily_hour),
            ("weekly_hour", scheduler.weekly_hour),
            ("monthly_hour", scheduler.monthly_hour),
        ] {
            if hour > 23 {
                anyhow::bail!("Scheduler {name} must be between 0 and 23, got {hour}");
            }
        }

        if scheduler.tick_interval.is_zero() {
            anyhow::bail!("Scheduler tick interval must be greater than zero");
        }

        if config.admin.tokens.iter().all(|t| !t.admin) {
            log::warn!("No admin token configured; every admin request will be rejected");
        }

        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle commands that don't require starting the service
    pub async fn handle_common_command(
        command: &CommonCommands,
        config: &Configuration,
    ) -> Result<bool> {
        match command {
            CommonCommands::Config { json } => {
                display_config(config, *json)?;
                Ok(true)
            }
            CommonCommands::Validate => {
                validate_config(config)?;
                Ok(true)
            }
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(true)
            }
            CommonCommands::Start => Ok(false),
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
