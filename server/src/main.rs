//! EventDesk Server - Main entry point.
//!
//! This binary starts the EventDesk API server with:
//! - Structured JSON logging
//! - SQLite schema setup on startup
//! - Optional registration emails through an HTTP mail API
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`eventdesk_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! # Local development with defaults (port 8000, ./eventdesk.db)
//! cargo run --bin eventdesk-server
//!
//! # With registration emails
//! DATABASE_URL="sqlite:///var/lib/eventdesk/eventdesk.db" \
//! EVENTDESK_NOTIFY_ON_REGISTRATION=true \
//! EVENTDESK_MAIL_API_URL="https://mail.internal" \
//! EVENTDESK_MAIL_API_KEY="secret" \
//! cargo run --release --bin eventdesk-server
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use eventdesk_server::config::Config;
use eventdesk_server::db::Database;
use eventdesk_server::mailer::{HttpMailer, RegistrationNotifier};
use eventdesk_server::routes::{create_router, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                             - HTTP server port (default: 8000)");
            eprintln!("  DATABASE_URL                     - SQLite URL (default: sqlite://eventdesk.db)");
            eprintln!("  EVENTDESK_DB_MAX_CONNECTIONS     - Pool size (default: 5)");
            eprintln!("  EVENTDESK_BCRYPT_COST            - bcrypt cost, 4-31 (default: 12)");
            eprintln!("  EVENTDESK_MAIL_FROM              - Sender address (default: mail@example.com)");
            eprintln!("  EVENTDESK_NOTIFY_ON_REGISTRATION - Email on event registration (default: false)");
            eprintln!("  EVENTDESK_MAIL_API_URL           - Mail API base URL (required with notifications)");
            eprintln!("  EVENTDESK_MAIL_API_KEY           - Mail API bearer key");
            eprintln!("  EVENTDESK_UNIQUE_REGISTRATIONS   - One registration per user and event (default: false)");
            eprintln!("  EVENTDESK_EVENT_MUTATION_POLICY  - any-authenticated | organizer-only");
            eprintln!("  RUST_LOG                         - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    if let Err(err) = run(config).await {
        error!(error = %format!("{err:#}"), "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        port = config.port,
        event_mutation_policy = %config.event_mutation_policy,
        unique_registrations = config.unique_registrations,
        notify_on_registration = config.notify_on_registration,
        "EventDesk server starting"
    );

    let db = Database::connect(&config.database_url, config.max_connections)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_url))?;

    let notifier = build_notifier(&config)?;
    let port = config.port;

    let mut state = AppState::new(config, db.clone());
    if let Some(notifier) = notifier {
        state = state.with_notifier(notifier);
    }

    let app = create_router(state);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    info!(port, address = %bind_addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;

    info!("Server shutting down gracefully");
    db.pool().close().await;
    info!("Database pool closed");
    Ok(())
}

/// Builds the registration notifier when notifications are enabled.
fn build_notifier(config: &Config) -> anyhow::Result<Option<RegistrationNotifier>> {
    if !config.notify_on_registration {
        return Ok(None);
    }

    let base_url = config
        .mail_api_url
        .as_deref()
        .context("EVENTDESK_MAIL_API_URL is required when notifications are enabled")?;
    let mailer = HttpMailer::new(base_url, config.mail_api_key.clone())
        .context("failed to create mail client")?;

    info!(mail_from = %config.mail_from, "Registration notifications enabled");
    Ok(Some(RegistrationNotifier::new(
        Arc::new(mailer),
        config.mail_from.clone(),
    )))
}

/// Initialize structured logging with tracing.
///
/// Configures JSON-formatted output with:
/// - Environment-based log level filtering via RUST_LOG
/// - Default log level of `info`
/// - Target and level information
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGINT (Ctrl+C) or SIGTERM is received.
///
/// If a handler cannot be installed the failure is logged and that signal is
/// ignored; the other one still triggers shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
