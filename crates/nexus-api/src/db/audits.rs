//! Audit persistence.
//!
//! `start_time`, `end_time` and `due_date` are wall-clock timestamps
//! (`TIMESTAMP` without zone), matching how due dates are derived.

use chrono::{DateTime, NaiveDateTime, Utc};
use nexus_core::RecordStatus;
use sqlx::PgPool;

use crate::state::AuditRecord;

pub async fn upsert(pool: &PgPool, record: &AuditRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audits (id, compliance_id, outlet_id, user_id, status, start_time, end_time,
                             due_date, progress, notes, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         ON CONFLICT (id) DO UPDATE SET
             status = EXCLUDED.status,
             end_time = EXCLUDED.end_time,
             due_date = EXCLUDED.due_date,
             progress = EXCLUDED.progress,
             notes = EXCLUDED.notes,
             updated_at = EXCLUDED.updated_at
         WHERE audits.updated_at <= EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(record.compliance_id)
    .bind(record.outlet_id)
    .bind(record.user_id)
    .bind(record.status.as_str())
    .bind(record.start_time)
    .bind(record.end_time)
    .bind(record.due_date)
    .bind(record.progress)
    .bind(&record.notes)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete an audit. Its forms and issues cascade.
pub async fn delete(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM audits WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<AuditRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AuditRow>(
        "SELECT id, compliance_id, outlet_id, user_id, status, start_time, end_time, due_date,
                progress, notes, created_at, updated_at
         FROM audits ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(AuditRow::into_record).collect())
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: i64,
    compliance_id: i64,
    outlet_id: i64,
    user_id: i64,
    status: String,
    start_time: NaiveDateTime,
    end_time: Option<NaiveDateTime>,
    due_date: NaiveDateTime,
    progress: f64,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_record(self) -> AuditRecord {
        let status = super::parse_or(
            "audits",
            self.id,
            &self.status,
            RecordStatus::from_name(&self.status),
            RecordStatus::Draft,
        );
        AuditRecord {
            id: self.id,
            compliance_id: self.compliance_id,
            outlet_id: self.outlet_id,
            user_id: self.user_id,
            status,
            start_time: self.start_time,
            end_time: self.end_time,
            due_date: self.due_date,
            progress: self.progress,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
