//! User persistence: the `users` table and the `user_roles` relation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::state::UserRecord;

/// Insert or update a user and replace their role assignments.
pub async fn upsert(pool: &PgPool, record: &UserRecord) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, is_active, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (id) DO UPDATE SET
             name = EXCLUDED.name,
             email = EXCLUDED.email,
             password_hash = EXCLUDED.password_hash,
             is_active = EXCLUDED.is_active,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(&record.name)
    .bind(&record.email)
    .bind(&record.password_hash)
    .bind(record.is_active)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
        .bind(record.id)
        .execute(&mut *tx)
        .await?;

    for role_id in &record.role_ids {
        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
            .bind(record.id)
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await
}

/// Delete a user. Role assignments and sessions cascade.
pub async fn delete(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Load all users with their role ids.
pub async fn load_all(pool: &PgPool) -> Result<Vec<UserRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, UserRow>(
        "SELECT id, name, email, password_hash, is_active, created_at, updated_at
         FROM users ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    let links: Vec<(i64, i64)> =
        sqlx::query_as("SELECT user_id, role_id FROM user_roles ORDER BY user_id, role_id")
            .fetch_all(pool)
            .await?;
    let mut roles: HashMap<i64, Vec<i64>> = HashMap::new();
    for (user_id, role_id) in links {
        roles.entry(user_id).or_default().push(role_id);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let role_ids = roles.remove(&row.id).unwrap_or_default();
            row.into_record(role_ids)
        })
        .collect())
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    password_hash: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_record(self, role_ids: Vec<i64>) -> UserRecord {
        UserRecord {
            id: self.id,
            name: self.name,
            email: self.email,
            password_hash: self.password_hash,
            role_ids,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
