//! Outlet persistence.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::state::OutletRecord;

pub async fn upsert(pool: &PgPool, record: &OutletRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO outlets (id, name, address, city, state, postal_code, phone_number,
                              operating_hours_info, is_active, outlet_user_id, manager_id,
                              created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         ON CONFLICT (id) DO UPDATE SET
             name = EXCLUDED.name,
             address = EXCLUDED.address,
             city = EXCLUDED.city,
             state = EXCLUDED.state,
             postal_code = EXCLUDED.postal_code,
             phone_number = EXCLUDED.phone_number,
             operating_hours_info = EXCLUDED.operating_hours_info,
             is_active = EXCLUDED.is_active,
             outlet_user_id = EXCLUDED.outlet_user_id,
             manager_id = EXCLUDED.manager_id,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(&record.name)
    .bind(&record.address)
    .bind(&record.city)
    .bind(&record.state)
    .bind(&record.postal_code)
    .bind(&record.phone_number)
    .bind(&record.operating_hours_info)
    .bind(record.is_active)
    .bind(record.outlet_user_id)
    .bind(record.manager_id)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM outlets WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<OutletRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, OutletRow>(
        "SELECT id, name, address, city, state, postal_code, phone_number, operating_hours_info,
                is_active, outlet_user_id, manager_id, created_at, updated_at
         FROM outlets ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(OutletRow::into_record).collect())
}

#[derive(sqlx::FromRow)]
struct OutletRow {
    id: i64,
    name: String,
    address: String,
    city: String,
    state: String,
    postal_code: String,
    phone_number: Option<String>,
    operating_hours_info: serde_json::Value,
    is_active: bool,
    outlet_user_id: Option<i64>,
    manager_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OutletRow {
    fn into_record(self) -> OutletRecord {
        OutletRecord {
            id: self.id,
            name: self.name,
            address: self.address,
            city: self.city,
            state: self.state,
            postal_code: self.postal_code,
            phone_number: self.phone_number,
            operating_hours_info: self.operating_hours_info,
            is_active: self.is_active,
            outlet_user_id: self.outlet_user_id,
            manager_id: self.manager_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
