//! # nexus-api: Binary Entry Point
//!
//! Starts the Axum HTTP server for NexusComply.
//! Binds to a configurable port (default 8080).

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use nexus_api::state::AppConfig;
use nexus_core::WeekStart;
use zeroize::Zeroizing;

/// Read an optional, non-empty environment variable.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an optional environment variable, failing on malformed values.
fn parse_env<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| format!("invalid {name} {raw:?}: {e}").into()),
    }
}

/// Build configuration from environment.
fn config_from_env() -> Result<AppConfig, Box<dyn std::error::Error>> {
    let defaults = AppConfig::default();
    Ok(AppConfig {
        port: parse_env("PORT")?.unwrap_or(defaults.port),
        storage_root: env_var("STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_root),
        week_start: parse_env::<WeekStart>("WEEK_START")?.unwrap_or(defaults.week_start),
        reset_token_ttl_minutes: parse_env("RESET_TOKEN_TTL_MINUTES")?
            .unwrap_or(defaults.reset_token_ttl_minutes),
        password_iterations: parse_env("PASSWORD_HASH_ITERATIONS")?
            .unwrap_or(defaults.password_iterations),
        admin_email: env_var("ADMIN_EMAIL"),
        admin_password: env_var("ADMIN_PASSWORD").map(Zeroizing::new),
        metrics_enabled: env_var("NEXUS_METRICS_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(defaults.metrics_enabled),
        trusted_proxies: trusted_proxies_from_env()?,
    })
}

/// Comma-separated `TRUSTED_PROXIES` addresses.
fn trusted_proxies_from_env() -> Result<Vec<IpAddr>, Box<dyn std::error::Error>> {
    let Some(raw) = env_var("TRUSTED_PROXIES") else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<IpAddr>()
                .map_err(|e| format!("invalid TRUSTED_PROXIES entry {s:?}: {e}").into())
        })
        .collect()
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = env_var("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        return;
    }
    tracing::info!("Shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = config_from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {e}");
        e
    })?;
    tracing::debug!(?config, "configuration loaded");
    let port = config.port;

    // Optional: absent DATABASE_URL means in-memory only.
    let db_pool = nexus_api::db::init_pool().await.map_err(|e| {
        tracing::error!("Database initialization failed: {e}");
        e
    })?;

    let state = nexus_api::bootstrap::bootstrap(config, db_pool)
        .await
        .map_err(|e| {
            tracing::error!("Bootstrap failed: {e}");
            e
        })?;

    let app = nexus_api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("NexusComply API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
