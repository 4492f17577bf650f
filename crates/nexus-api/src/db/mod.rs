//! # Database Persistence Layer
//!
//! Postgres persistence for NexusComply via SQLx.
//!
//! The database layer is **optional**. When `DATABASE_URL` is set, every
//! mutation is written through to PostgreSQL after the in-memory store is
//! updated, and all tables are loaded back on startup. When absent, the API
//! runs in-memory only (development and tests).
//!
//! Each module exposes `upsert`/`delete` for its table and a `load_all`
//! used by `AppState::hydrate_from_db`. Lifecycle rules are enforced in the
//! application layer, not in SQL; the schema only carries keys and the
//! `(audit_id, form_id)` uniqueness of audit forms.

pub mod activity_logs;
pub mod audit_forms;
pub mod audits;
pub mod compliance;
pub mod form_templates;
pub mod issues;
pub mod outlets;
pub mod roles;
pub mod sessions;
pub mod users;
pub mod watermarks;

use std::future::Future;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if `DATABASE_URL` is not set (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool() -> Result<Option<PgPool>, sqlx::Error> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL not set; running in-memory only mode. \
                 State will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Run a persistence operation when a pool is configured.
///
/// Failures are logged and swallowed: the in-memory store stays
/// authoritative for the running process.
pub async fn write_through<'a, F, Fut>(pool: Option<&'a PgPool>, resource: &str, id: i64, op: F)
where
    F: FnOnce(&'a PgPool) -> Fut,
    Fut: Future<Output = Result<(), sqlx::Error>>,
{
    if let Some(pool) = pool {
        if let Err(e) = op(pool).await {
            tracing::error!(resource, id, error = %e, "failed to persist to database");
        }
    }
}

/// Parse a status-like column, logging and falling back on unknown values.
pub(crate) fn parse_or<T: Copy>(
    table: &str,
    id: i64,
    raw: &str,
    parsed: Option<T>,
    fallback: T,
) -> T {
    parsed.unwrap_or_else(|| {
        tracing::error!(
            table,
            id,
            value = %raw,
            "unrecognized enum value in database; using fallback"
        );
        fallback
    })
}
