//! # Campus Guard - security service for the campus learning platform
//!
//! Rate limiting, CAPTCHA verification with retry, fingerprinted sessions,
//! CSRF tokens and two-factor codes behind a small JSON API.
//!
//! ## Architecture
//! ```text
//! Web client → Campus Guard → Auth backend
//!                   ↓
//!          Memory / Redis (rate limit records)
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod auth_errors;
mod captcha;
mod config;
mod csrf;
mod events;
mod rate_limit;
mod routes;
mod session;
mod state;
mod two_factor;

use crate::config::{AppConfig, Environment};
use session::session_purge_worker;
use state::AppState;

/// Campus Guard - learning platform security service
#[derive(Parser, Debug)]
#[command(name = "campus-guard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/campus-guard.toml")]
    config: String,

    /// Redis URL (overrides config, selects the redis store)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Deployment environment (development, production)
    #[arg(long, env = "CAMPUS_ENV")]
    environment: Option<Environment>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting Campus Guard v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!(
        environment = ?config.environment,
        storage = ?config.storage.backend,
        "Configuration loaded from {}",
        args.config
    );

    // Initialize application state
    let state = AppState::new(config.clone()).await?;

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Spawn idle session purge worker
    let sessions = state.sessions.clone();
    let csrf = state.csrf.clone();
    let purge_shutdown = shutdown_tx.subscribe();
    let purge_interval = Duration::from_secs(config.session.purge_interval_secs.max(1));
    tokio::spawn(async move {
        session_purge_worker(sessions, csrf, purge_interval, purge_shutdown).await;
    });

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("Campus Guard listening on {}", config.listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Campus Guard shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
