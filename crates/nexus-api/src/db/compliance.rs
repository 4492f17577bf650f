//! Compliance requirement persistence, including attached form templates.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use nexus_core::Frequency;
use sqlx::PgPool;

use crate::state::{ComplianceRequirementRecord, SubmissionType};

/// Insert or update a requirement and replace its template attachments.
pub async fn upsert(pool: &PgPool, record: &ComplianceRequirementRecord) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO compliance_requirements (id, title, description, category, frequency,
                                              is_active, submission_type,
                                              document_upload_instructions, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (id) DO UPDATE SET
             title = EXCLUDED.title,
             description = EXCLUDED.description,
             category = EXCLUDED.category,
             frequency = EXCLUDED.frequency,
             is_active = EXCLUDED.is_active,
             submission_type = EXCLUDED.submission_type,
             document_upload_instructions = EXCLUDED.document_upload_instructions,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(&record.title)
    .bind(&record.description)
    .bind(&record.category)
    .bind(record.frequency.map(|f| f.as_str()))
    .bind(record.is_active)
    .bind(record.submission_type.as_str())
    .bind(&record.document_upload_instructions)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM compliance_form_templates WHERE compliance_id = $1")
        .bind(record.id)
        .execute(&mut *tx)
        .await?;

    for template_id in &record.form_template_ids {
        sqlx::query(
            "INSERT INTO compliance_form_templates (compliance_id, form_template_id) VALUES ($1, $2)",
        )
        .bind(record.id)
        .bind(template_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

pub async fn delete(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM compliance_requirements WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<ComplianceRequirementRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RequirementRow>(
        "SELECT id, title, description, category, frequency, is_active, submission_type,
                document_upload_instructions, created_at, updated_at
         FROM compliance_requirements ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    let links: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT compliance_id, form_template_id FROM compliance_form_templates
         ORDER BY compliance_id, form_template_id",
    )
    .fetch_all(pool)
    .await?;
    let mut templates: HashMap<i64, Vec<i64>> = HashMap::new();
    for (compliance_id, template_id) in links {
        templates.entry(compliance_id).or_default().push(template_id);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let ids = templates.remove(&row.id).unwrap_or_default();
            row.into_record(ids)
        })
        .collect())
}

#[derive(sqlx::FromRow)]
struct RequirementRow {
    id: i64,
    title: String,
    description: Option<String>,
    category: Option<String>,
    frequency: Option<String>,
    is_active: bool,
    submission_type: String,
    document_upload_instructions: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RequirementRow {
    fn into_record(self, form_template_ids: Vec<i64>) -> ComplianceRequirementRecord {
        // Unknown labels load as `None`, which due-date derivation treats as monthly.
        let frequency = self.frequency.as_deref().and_then(|label| {
            Frequency::from_str(label)
                .map_err(|e| {
                    tracing::error!(id = self.id, error = %e, "unrecognized frequency in database");
                })
                .ok()
        });
        let submission_type = super::parse_or(
            "compliance_requirements",
            self.id,
            &self.submission_type,
            SubmissionType::from_name(&self.submission_type),
            SubmissionType::Form,
        );
        ComplianceRequirementRecord {
            id: self.id,
            title: self.title,
            description: self.description,
            category: self.category,
            frequency,
            is_active: self.is_active,
            submission_type,
            document_upload_instructions: self.document_upload_instructions,
            form_template_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
