use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tenfis::config::Config;
use tenfis::AppState;

#[derive(Parser, Debug)]
#[command(name = "tenfis")]
#[command(author, version, about = "Therapist marketplace backend", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "tenfis.toml", env = "TENFIS_CONFIG")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    // Initialize logging
    let log_level = log_directive(cli.log_level.as_deref(), &config.logging.level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tenfis v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(config.storage_dir()).with_context(|| {
        format!(
            "Failed to create data directory {}",
            config.server.data_dir.display()
        )
    })?;

    let db = tenfis::db::init(&config.server.data_dir)
        .await
        .context("Failed to initialize database")?;

    tenfis::api::auth::ensure_admin_user(&db, &config).await?;

    let state = Arc::new(AppState::new(config.clone(), db));

    if config.rate_limit.enabled {
        tenfis::api::rate_limit::spawn_cleanup_task(
            state.rate_limiter.clone(),
            config.rate_limit.cleanup_interval,
        );
    }

    let app = tenfis::api::create_router(state);

    let api_addr = format!("{}:{}", config.server.host, config.server.api_port);
    let listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("Failed to bind {}", api_addr))?;

    tracing::info!("API server listening on http://{}", api_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Filter directive used when `RUST_LOG` is unset: the CLI flag wins over
/// the config file
fn log_directive(cli: Option<&str>, configured: &str) -> String {
    cli.unwrap_or(configured).to_string()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_log_level_overrides_config() {
        assert_eq!(log_directive(Some("debug"), "info"), "debug");
        assert_eq!(log_directive(None, "warn,tenfis=debug"), "warn,tenfis=debug");
    }

    #[test]
    fn test_cli_parses_log_level() {
        let cli = Cli::parse_from(["tenfis", "--log-level", "trace"]);
        assert_eq!(cli.log_level.as_deref(), Some("trace"));
    }
}
