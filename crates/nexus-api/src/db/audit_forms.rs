//! Audit form persistence.
//!
//! Rows are unique per `(audit_id, form_id)`; the upsert targets that key so
//! a resubmission updates the existing row.

use chrono::{DateTime, Utc};
use nexus_core::RecordStatus;
use sqlx::PgPool;

use crate::state::AuditFormRecord;

pub async fn upsert(pool: &PgPool, record: &AuditFormRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_forms (id, audit_id, form_id, name, value, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (audit_id, form_id) DO UPDATE SET
             name = EXCLUDED.name,
             value = EXCLUDED.value,
             status = EXCLUDED.status,
             updated_at = EXCLUDED.updated_at
         WHERE audit_forms.updated_at <= EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(record.audit_id)
    .bind(record.form_id)
    .bind(&record.name)
    .bind(&record.value)
    .bind(record.status.as_str())
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<AuditFormRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AuditFormRow>(
        "SELECT id, audit_id, form_id, name, value, status, created_at, updated_at
         FROM audit_forms ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(AuditFormRow::into_record).collect())
}

#[derive(sqlx::FromRow)]
struct AuditFormRow {
    id: i64,
    audit_id: i64,
    form_id: i64,
    name: String,
    value: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AuditFormRow {
    fn into_record(self) -> AuditFormRecord {
        let status = super::parse_or(
            "audit_forms",
            self.id,
            &self.status,
            RecordStatus::from_name(&self.status),
            RecordStatus::Draft,
        );
        AuditFormRecord {
            id: self.id,
            audit_id: self.audit_id,
            form_id: self.form_id,
            name: self.name,
            value: self.value,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
