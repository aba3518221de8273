//! Conduit server binary

use anyhow::Result;
use clap::{Parser, Subcommand};
use conduit::bus::EventBus;
use conduit::config::ConduitConfig;
use conduit::permissions::PermissionEngine;
use conduit::server::{api_router, AppState};
use conduit::session::SessionManager;
use conduit::store::Database;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "conduit")]
#[command(version)]
#[command(about = "Local orchestration service for AI coding-agent subprocesses")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONDUIT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Conduit server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show the effective configuration
    Config {
        /// Show the built-in defaults instead
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("conduit={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match cli.config {
        Some(path) => ConduitConfig::from_file(&path)?,
        None => ConduitConfig::default(),
    }
    .apply_env();

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await?;
        }
        Commands::Config { default } => {
            let shown = if default {
                ConduitConfig::default()
            } else {
                config
            };
            println!("{}", toml::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}

async fn serve(config: ConduitConfig) -> Result<()> {
    config.validate()?;

    tracing::info!("starting Conduit");

    let store = Arc::new(Database::open(&config.database_path)?);
    let bus = Arc::new(EventBus::new());
    let permissions = Arc::new(PermissionEngine::new(store.clone()));
    let manager = SessionManager::new(
        config.clone(),
        store.clone(),
        bus.clone(),
        permissions.clone(),
    )?;

    // Restart reconciliation: no session stays "live" in the store with a
    // dead subprocess behind it
    let cleaned = manager.cleanup_orphans()?;
    if cleaned > 0 {
        tracing::info!(count = cleaned, "cleaned up orphaned sessions");
    }

    let state = AppState {
        manager: manager.clone(),
        store,
        permissions,
        bus: bus.clone(),
    };
    let router = api_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %addr,
        bridge_ports = format!(
            "{}..={}",
            config.ws_port_range_start, config.ws_port_range_end
        ),
        "Conduit listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    tracing::info!("shutting down sessions");
    manager.shutdown().await;
    bus.clear();

    Ok(())
}
