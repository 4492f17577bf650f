//! Activity log persistence. Append-only.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::state::ActivityLogRecord;

pub async fn insert(pool: &PgPool, record: &ActivityLogRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO activity_logs (id, user_id, action, target_type, target_id, details, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(record.id)
    .bind(record.user_id)
    .bind(&record.action)
    .bind(&record.target_type)
    .bind(record.target_id)
    .bind(&record.details)
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<ActivityLogRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ActivityLogRow>(
        "SELECT id, user_id, action, target_type, target_id, details, created_at
         FROM activity_logs ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| ActivityLogRecord {
            id: row.id,
            user_id: row.user_id,
            action: row.action,
            target_type: row.target_type,
            target_id: row.target_id,
            details: row.details,
            created_at: row.created_at,
        })
        .collect())
}

#[derive(sqlx::FromRow)]
struct ActivityLogRow {
    id: i64,
    user_id: Option<i64>,
    action: String,
    target_type: String,
    target_id: Option<i64>,
    details: serde_json::Value,
    created_at: DateTime<Utc>,
}
