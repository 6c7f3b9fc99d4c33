//! Soil monitoring dashboard daemon.
//!
//! Validates the session, picks the admin or farmer profile from its groups,
//! and runs the live dashboard until a shutdown signal arrives.

mod console;
mod signals;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use soil_common::config::DashboardConfig;
use soil_common::session::Session;
use soil_live::{HttpBackend, LiveDashboard};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::console::{ConsoleNotifier, ConsoleView};
use crate::signals::SignalListener;

/// Token lifetime assumed when `--token-expiry` is not given.
const DEFAULT_TOKEN_LIFETIME_MS: i64 = 60 * 60 * 1000;

/// Dashboard daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "soil-dashboard",
    about = "Soil monitoring dashboard - live sensor readings, alerts and predictions",
    version,
    long_about = None
)]
struct Args {
    /// Path to a dashboard configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Access token (JWT). Falls back to SOIL_DASHBOARD_TOKEN.
    #[arg(long, short = 't', value_name = "JWT")]
    token: Option<String>,

    /// Token expiry in epoch milliseconds (default: one hour from now).
    #[arg(long, value_name = "MILLIS")]
    token_expiry: Option<i64>,

    /// REST API base URL (overrides config file).
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Push endpoint URL (overrides config file).
    #[arg(long, value_name = "URL")]
    ws_url: Option<String>,

    /// Serve the local status API.
    #[arg(long, short = 's')]
    status: bool,

    /// Status API bind address (overrides config file).
    #[arg(long, value_name = "ADDR")]
    status_addr: Option<SocketAddr>,

    /// Ring the terminal bell on pushed alerts.
    #[arg(long)]
    bell: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting soil dashboard");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    info!(api = %config.api.base_url, ws = %config.api.ws_url, "Configuration loaded");

    let token = resolve_token(&args)?;
    let expiry = args
        .token_expiry
        .unwrap_or_else(|| Utc::now().timestamp_millis() + DEFAULT_TOKEN_LIFETIME_MS);
    let session = Session::from_token(&token, expiry).context("Invalid access token")?;
    info!(user = %session.subject_id, role = %session.role(), "Session validated");

    run(config, session, args.bell).await
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("soil_dashboard={level},soil_live={level},soil_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `SOIL_DASHBOARD_CONFIG` environment variable
/// 3. `/etc/soil-dashboard/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<DashboardConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return DashboardConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("SOIL_DASHBOARD_CONFIG") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from SOIL_DASHBOARD_CONFIG");
            return DashboardConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from SOIL_DASHBOARD_CONFIG={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "SOIL_DASHBOARD_CONFIG set but file does not exist, checking other locations"
        );
    }

    for candidate in ["/etc/soil-dashboard/config.toml", "config/default.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!(?path, "Loading config file");
            return DashboardConfig::from_file(&path)
                .with_context(|| format!("Failed to load config from {path:?}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(DashboardConfig::default())
}

/// Command-line values win over the file.
fn apply_overrides(config: &mut DashboardConfig, args: &Args) {
    if let Some(url) = &args.api_url {
        config.api.base_url.clone_from(url);
    }
    if let Some(url) = &args.ws_url {
        config.api.ws_url.clone_from(url);
    }
    if args.status {
        config.status.enabled = true;
    }
    if let Some(addr) = args.status_addr {
        config.status.bind_addr = addr;
    }
}

fn resolve_token(args: &Args) -> Result<String> {
    if let Some(token) = &args.token {
        return Ok(token.clone());
    }
    std::env::var("SOIL_DASHBOARD_TOKEN")
        .context("No access token: pass --token or set SOIL_DASHBOARD_TOKEN")
}

/// Run the dashboard until SIGTERM or Ctrl+C. SIGHUP triggers a refresh.
async fn run(config: DashboardConfig, session: Session, bell: bool) -> Result<()> {
    let mut signals = SignalListener::new().context("Failed to set up signal handlers")?;

    let backend = HttpBackend::new(&config.api, session.access_token.clone())
        .context("Failed to create REST client")?;
    let view = Arc::new(ConsoleView::new(config.alerts.panel_limit));
    let notifier = Arc::new(ConsoleNotifier::new(bell && config.notifications.sound));
    let status_enabled = config.status.enabled;

    let mut dashboard = LiveDashboard::new(config, session, backend, view, notifier)
        .context("Failed to create dashboard")?;
    dashboard.start().await;

    let (status_tx, mut status_rx) = watch::channel(false);
    let status_task = status_enabled.then(|| {
        let server = dashboard.status_server();
        tokio::spawn(server.serve(async move {
            let _ = status_rx.changed().await;
        }))
    });

    loop {
        let signal = signals.next().await.context("Signal listener failed")?;
        if signal.is_shutdown() {
            info!(%signal, "Shutting down");
            break;
        }
        if let Err(e) = dashboard.reconciler().refresh().await {
            warn!(error = %e, "Refresh failed");
        }
    }

    dashboard.stop().await;
    let _ = status_tx.send(true);
    if let Some(task) = status_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Status API stopped with an error"),
            Err(e) => warn!(error = %e, "Status API task failed"),
        }
    }

    debug!(
        attempts = dashboard.metrics().connection_attempts.get(),
        frames = dashboard.metrics().frames_received.get(),
        "Final push statistics"
    );
    info!("Soil dashboard stopped");
    Ok(())
}
