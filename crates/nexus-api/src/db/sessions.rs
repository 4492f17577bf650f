//! Bearer session persistence. Rows are keyed by token digest.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::state::SessionRecord;

pub async fn insert(pool: &PgPool, digest: &str, session: &SessionRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sessions (token_digest, user_id, device_name, created_at, last_used_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (token_digest) DO NOTHING",
    )
    .bind(digest)
    .bind(session.user_id)
    .bind(&session.device_name)
    .bind(session.created_at)
    .bind(session.last_used_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete(pool: &PgPool, digest: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token_digest = $1")
        .bind(digest)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_for_user(pool: &PgPool, user_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Load all sessions as `(digest, session)` pairs.
pub async fn load_all(pool: &PgPool) -> Result<Vec<(String, SessionRecord)>, sqlx::Error> {
    let rows: Vec<(String, i64, Option<String>, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
        "SELECT token_digest, user_id, device_name, created_at, last_used_at FROM sessions",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(digest, user_id, device_name, created_at, last_used_at)| {
            (
                digest,
                SessionRecord {
                    user_id,
                    device_name,
                    created_at,
                    last_used_at,
                },
            )
        })
        .collect())
}
