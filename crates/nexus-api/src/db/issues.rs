//! Issue and corrective action persistence.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use nexus_core::{IssueStatus, Severity};
use sqlx::PgPool;

use crate::state::{CorrectiveActionRecord, IssueRecord};

pub async fn upsert_issue(pool: &PgPool, record: &IssueRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO issues (id, audit_id, description, severity, due_date, status, raised_by,
                             created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (id) DO UPDATE SET
             description = EXCLUDED.description,
             severity = EXCLUDED.severity,
             due_date = EXCLUDED.due_date,
             status = EXCLUDED.status,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(record.audit_id)
    .bind(&record.description)
    .bind(record.severity.as_str())
    .bind(record.due_date)
    .bind(record.status.as_str())
    .bind(record.raised_by)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete an issue. Its corrective actions cascade.
pub async fn delete_issue(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM issues WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn upsert_corrective_action(
    pool: &PgPool,
    record: &CorrectiveActionRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO corrective_actions (id, issue_id, description, assigned_to, completion_date,
                                         verification_date, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (id) DO UPDATE SET
             description = EXCLUDED.description,
             assigned_to = EXCLUDED.assigned_to,
             completion_date = EXCLUDED.completion_date,
             verification_date = EXCLUDED.verification_date,
             status = EXCLUDED.status,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(record.issue_id)
    .bind(&record.description)
    .bind(record.assigned_to)
    .bind(record.completion_date)
    .bind(record.verification_date)
    .bind(record.status.as_str())
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_corrective_action(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM corrective_actions WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn load_issues(pool: &PgPool) -> Result<Vec<IssueRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, IssueRow>(
        "SELECT id, audit_id, description, severity, due_date, status, raised_by,
                created_at, updated_at
         FROM issues ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(IssueRow::into_record).collect())
}

pub async fn load_corrective_actions(
    pool: &PgPool,
) -> Result<Vec<CorrectiveActionRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, CorrectiveActionRow>(
        "SELECT id, issue_id, description, assigned_to, completion_date, verification_date,
                status, created_at, updated_at
         FROM corrective_actions ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(CorrectiveActionRow::into_record).collect())
}

#[derive(sqlx::FromRow)]
struct IssueRow {
    id: i64,
    audit_id: i64,
    description: String,
    severity: String,
    due_date: Option<NaiveDate>,
    status: String,
    raised_by: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl IssueRow {
    fn into_record(self) -> IssueRecord {
        let severity = super::parse_or(
            "issues",
            self.id,
            &self.severity,
            Severity::from_str(&self.severity).ok(),
            Severity::Medium,
        );
        let status = super::parse_or(
            "issues",
            self.id,
            &self.status,
            IssueStatus::from_name(&self.status),
            IssueStatus::Open,
        );
        IssueRecord {
            id: self.id,
            audit_id: self.audit_id,
            description: self.description,
            severity,
            due_date: self.due_date,
            status,
            raised_by: self.raised_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CorrectiveActionRow {
    id: i64,
    issue_id: i64,
    description: String,
    assigned_to: Option<i64>,
    completion_date: Option<NaiveDate>,
    verification_date: Option<NaiveDate>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CorrectiveActionRow {
    fn into_record(self) -> CorrectiveActionRecord {
        let status = super::parse_or(
            "corrective_actions",
            self.id,
            &self.status,
            IssueStatus::from_name(&self.status),
            IssueStatus::Open,
        );
        CorrectiveActionRecord {
            id: self.id,
            issue_id: self.issue_id,
            description: self.description,
            assigned_to: self.assigned_to,
            completion_date: self.completion_date,
            verification_date: self.verification_date,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
