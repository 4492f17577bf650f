//! Form template persistence. `structure` is stored as JSONB.

use chrono::{DateTime, Utc};
use nexus_core::RecordStatus;
use sqlx::PgPool;

use crate::state::FormTemplateRecord;

pub async fn upsert(pool: &PgPool, record: &FormTemplateRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO form_templates (id, name, description, structure, status, created_by,
                                     created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (id) DO UPDATE SET
             name = EXCLUDED.name,
             description = EXCLUDED.description,
             structure = EXCLUDED.structure,
             status = EXCLUDED.status,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(&record.name)
    .bind(&record.description)
    .bind(&record.structure)
    .bind(record.status.as_str())
    .bind(record.created_by)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM form_templates WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<FormTemplateRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, FormTemplateRow>(
        "SELECT id, name, description, structure, status, created_by, created_at, updated_at
         FROM form_templates ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(FormTemplateRow::into_record).collect())
}

#[derive(sqlx::FromRow)]
struct FormTemplateRow {
    id: i64,
    name: String,
    description: Option<String>,
    structure: serde_json::Value,
    status: String,
    created_by: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FormTemplateRow {
    fn into_record(self) -> FormTemplateRecord {
        let status = super::parse_or(
            "form_templates",
            self.id,
            &self.status,
            RecordStatus::from_name(&self.status),
            RecordStatus::Draft,
        );
        FormTemplateRecord {
            id: self.id,
            name: self.name,
            description: self.description,
            structure: self.structure,
            status,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
