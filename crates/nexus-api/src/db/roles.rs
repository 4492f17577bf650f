//! Role and ability persistence, including the `role_abilities` relation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::state::{AbilityRecord, RoleRecord};

/// Insert or update an ability.
pub async fn upsert_ability(pool: &PgPool, record: &AbilityRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO abilities (id, name, title, created_at) VALUES ($1, $2, $3, $4)
         ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, title = EXCLUDED.title",
    )
    .bind(record.id)
    .bind(&record.name)
    .bind(&record.title)
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete an ability. Grants referencing it cascade.
pub async fn delete_ability(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM abilities WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert or update a role and replace its ability grants.
pub async fn upsert_role(pool: &PgPool, record: &RoleRecord) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO roles (id, name, title, grants_all, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (id) DO UPDATE SET
             name = EXCLUDED.name,
             title = EXCLUDED.title,
             grants_all = EXCLUDED.grants_all,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(&record.name)
    .bind(&record.title)
    .bind(record.grants_all)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM role_abilities WHERE role_id = $1")
        .bind(record.id)
        .execute(&mut *tx)
        .await?;

    for ability_id in &record.ability_ids {
        sqlx::query("INSERT INTO role_abilities (role_id, ability_id) VALUES ($1, $2)")
            .bind(record.id)
            .bind(ability_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await
}

/// Delete a role. Grants and user assignments cascade.
pub async fn delete_role(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM roles WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn load_abilities(pool: &PgPool) -> Result<Vec<AbilityRecord>, sqlx::Error> {
    let rows: Vec<(i64, String, String, DateTime<Utc>)> =
        sqlx::query_as("SELECT id, name, title, created_at FROM abilities ORDER BY id")
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(id, name, title, created_at)| AbilityRecord {
            id,
            name,
            title,
            created_at,
        })
        .collect())
}

pub async fn load_roles(pool: &PgPool) -> Result<Vec<RoleRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RoleRow>(
        "SELECT id, name, title, grants_all, created_at, updated_at FROM roles ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    let links: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT role_id, ability_id FROM role_abilities ORDER BY role_id, ability_id",
    )
    .fetch_all(pool)
    .await?;
    let mut grants: HashMap<i64, Vec<i64>> = HashMap::new();
    for (role_id, ability_id) in links {
        grants.entry(role_id).or_default().push(ability_id);
    }

    Ok(rows
        .into_iter()
        .map(|row| RoleRecord {
            ability_ids: grants.remove(&row.id).unwrap_or_default(),
            id: row.id,
            name: row.name,
            title: row.title,
            grants_all: row.grants_all,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
        .collect())
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: i64,
    name: String,
    title: String,
    grants_all: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
