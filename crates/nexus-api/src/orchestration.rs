//! # Audit Orchestration
//!
//! Multi-record operations behind the audit endpoints. Each function here
//! mutates the in-memory stores synchronously and returns the records the
//! caller must write through; handlers do the persistence afterwards so no
//! lock is held across an `.await`.
//!
//! ## Form Submission
//!
//! [`submit_form`] upserts the audit form keyed on `(audit_id, form_id)`
//! and recomputes the audit's progress while holding
//! [`AppState::submissions`], so two concurrent submissions for the same
//! pair can never both insert, and the recompute always sees the upsert.
//!
//! ## Progress
//!
//! Progress is `submitted forms / templates attached to the requirement *
//! 100`. It is a secondary effect of a submission: when it cannot be
//! computed the submission still succeeds, the failure is logged and
//! counted in `nexus_progress_update_failures_total`, and the response
//! carries a warning.
//!
//! ## Review Workflow
//!
//! ```text
//! submit_audit:  draft | rejected | revising ──▶ pending
//! review_audit:  pending ──▶ approved (end_time set) | rejected
//!                approval is refused while a critical issue is unresolved
//! submit_form on a rejected audit moves it to revising
//! ```

use chrono::{Local, NaiveDateTime, Utc};
use nexus_core::{progress_percentage, FormStructure, IssueStatus, RecordStatus, Severity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::{AppError, Violations};
use crate::state::{AppState, AuditFormRecord, AuditRecord};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Reasons a progress recompute could not run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    #[error("audit {0} not found")]
    AuditNotFound(i64),

    #[error("compliance requirement {compliance_id} of audit {audit_id} not found")]
    RequirementNotFound { audit_id: i64, compliance_id: i64 },
}

/// Result of the best-effort progress step, reported to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProgressOutcome {
    /// Progress was recomputed.
    Updated { progress: f64 },
    /// The requirement has no templates; progress left as it was.
    Unchanged,
    /// Recompute failed; the submission itself was kept.
    Failed { warning: String },
}

/// Recompute and store the progress of `audit_id`.
///
/// Returns `Ok(None)` when the requirement has no templates, leaving the
/// stored value untouched.
pub fn recompute_progress(state: &AppState, audit_id: i64) -> Result<Option<f64>, ProgressError> {
    let audit = state
        .audits
        .get(&audit_id)
        .ok_or(ProgressError::AuditNotFound(audit_id))?;
    let requirement = state
        .compliance_requirements
        .get(&audit.compliance_id)
        .ok_or(ProgressError::RequirementNotFound {
            audit_id,
            compliance_id: audit.compliance_id,
        })?;

    let total = requirement.form_template_ids.len();
    let completed = state.audit_forms.count(|f| f.audit_id == audit_id);

    let Some(progress) = progress_percentage(completed, total) else {
        return Ok(None);
    };
    state
        .audits
        .update(&audit_id, |a| {
            a.progress = progress;
            a.updated_at = Utc::now();
        })
        .ok_or(ProgressError::AuditNotFound(audit_id))?;
    Ok(Some(progress))
}

/// Run [`recompute_progress`] as a non-fatal step.
pub fn record_progress(state: &AppState, audit_id: i64) -> ProgressOutcome {
    match recompute_progress(state, audit_id) {
        Ok(Some(progress)) => ProgressOutcome::Updated { progress },
        Ok(None) => ProgressOutcome::Unchanged,
        Err(e) => {
            tracing::warn!(audit_id, error = %e, "audit progress update failed");
            state.metrics.record_progress_failure();
            ProgressOutcome::Failed {
                warning: format!("progress was not updated: {e}"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Form submission
// ---------------------------------------------------------------------------

/// One submitted form of an audit.
#[derive(Debug, Clone)]
pub struct FormSubmission {
    pub audit_id: i64,
    pub form_id: i64,
    pub name: String,
    pub value: Value,
}

/// Records touched by [`submit_form`].
#[derive(Debug, Clone)]
pub struct SubmissionResult {
    pub form: AuditFormRecord,
    /// Whether the form row was created rather than updated.
    pub created: bool,
    /// The audit after status and progress changes.
    pub audit: Option<AuditRecord>,
    pub progress: ProgressOutcome,
}

/// Upsert an audit form and recompute the audit's progress.
///
/// Rejects submissions to audits that are no longer editable (409), forms
/// whose template is not attached to the audit's requirement (422), and
/// values missing required template fields (422, one message per field).
/// Submitting to a rejected audit moves it to `revising`.
pub fn submit_form(
    state: &AppState,
    submission: FormSubmission,
) -> Result<SubmissionResult, AppError> {
    let _guard = state.submissions.lock();

    let audit = state
        .audits
        .get(&submission.audit_id)
        .ok_or_else(|| AppError::NotFound(format!("audit {} not found", submission.audit_id)))?;
    if !audit.status.is_editable() {
        return Err(AppError::Conflict(format!(
            "audit {} is {} and can no longer be edited",
            audit.id, audit.status
        )));
    }

    let template = state.form_templates.get(&submission.form_id).ok_or_else(|| {
        AppError::InvalidFields(Violations::single(
            "form_id",
            "The selected form id is invalid.",
        ))
    })?;
    if let Some(requirement) = state.compliance_requirements.get(&audit.compliance_id) {
        if !requirement.form_template_ids.contains(&template.id) {
            return Err(AppError::InvalidFields(Violations::single(
                "form_id",
                "The form is not part of this audit's compliance requirement.",
            )));
        }
    }
    check_required_fields(&template.structure, &submission.value)?;

    let now = Utc::now();
    let existing = state
        .audit_forms
        .find(|f| f.audit_id == submission.audit_id && f.form_id == submission.form_id);
    let (form, created) = match existing {
        Some(existing) => {
            let form = state
                .audit_forms
                .update(&existing.id, |f| {
                    f.name = submission.name.clone();
                    f.value = submission.value.clone();
                    f.status = RecordStatus::Draft;
                    f.updated_at = now;
                })
                .ok_or_else(|| AppError::Internal("audit form vanished during update".into()))?;
            (form, false)
        }
        None => {
            let form = state.audit_forms.insert_with(|id| AuditFormRecord {
                id,
                audit_id: submission.audit_id,
                form_id: submission.form_id,
                name: submission.name,
                value: submission.value,
                status: RecordStatus::Draft,
                created_at: now,
                updated_at: now,
            });
            (form, true)
        }
    };

    if audit.status == RecordStatus::Rejected {
        let next = audit.status.transition_to(RecordStatus::Revising)?;
        state.audits.update(&audit.id, |a| {
            a.status = next;
            a.updated_at = now;
        });
    }

    let progress = record_progress(state, audit.id);

    Ok(SubmissionResult {
        form,
        created,
        audit: state.audits.get(&audit.id),
        progress,
    })
}

fn check_required_fields(structure: &Value, value: &Value) -> Result<(), AppError> {
    let structure = match FormStructure::parse(structure) {
        Ok(structure) => structure,
        Err(e) => {
            // Stored before structure validation existed; accept any value.
            tracing::warn!(error = %e, "form template structure is invalid; skipping field checks");
            return Ok(());
        }
    };
    let missing = structure
        .missing_required(value)
        .map_err(|e| AppError::InvalidFields(Violations::single("value", e.to_string())))?;

    let mut violations = Violations::new();
    for field_id in missing {
        let label = structure
            .fields()
            .find(|f| f.id == field_id)
            .map(|f| f.label.clone())
            .unwrap_or_else(|| field_id.clone());
        violations.add(
            format!("value.{field_id}"),
            format!("The {label} field is required."),
        );
    }
    violations.into_result()
}

// ---------------------------------------------------------------------------
// Audit workflow
// ---------------------------------------------------------------------------

/// Submit an audit for review.
///
/// Every template attached to the requirement must have a submitted form.
/// The audit and its forms move to `pending`.
pub fn submit_audit(
    state: &AppState,
    audit_id: i64,
) -> Result<(AuditRecord, Vec<AuditFormRecord>), AppError> {
    let _guard = state.submissions.lock();

    let audit = state
        .audits
        .get(&audit_id)
        .ok_or_else(|| AppError::NotFound(format!("audit {audit_id} not found")))?;
    let next = audit.status.transition_to(RecordStatus::Pending)?;

    let requirement = state
        .compliance_requirements
        .get(&audit.compliance_id)
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "compliance requirement {} no longer exists",
                audit.compliance_id
            ))
        })?;

    let mut violations = Violations::new();
    for template_id in &requirement.form_template_ids {
        let submitted = state
            .audit_forms
            .find(|f| f.audit_id == audit_id && f.form_id == *template_id)
            .is_some();
        if !submitted {
            let name = state
                .form_templates
                .get(template_id)
                .map(|t| t.name)
                .unwrap_or_else(|| format!("form {template_id}"));
            violations.add("forms", format!("The {name} form has not been submitted."));
        }
    }
    violations.into_result()?;

    let now = Utc::now();
    let forms = state.audit_forms.update_where(
        |f| f.audit_id == audit_id && f.status != RecordStatus::Approved,
        |f| {
            f.status = RecordStatus::Pending;
            f.updated_at = now;
        },
    );
    let audit = state
        .audits
        .update(&audit_id, |a| {
            a.status = next;
            a.updated_at = now;
        })
        .ok_or_else(|| AppError::NotFound(format!("audit {audit_id} not found")))?;

    Ok((audit, forms))
}

/// Reviewer decision on a pending audit or form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    pub fn target(self) -> RecordStatus {
        match self {
            Self::Approve => RecordStatus::Approved,
            Self::Reject => RecordStatus::Rejected,
        }
    }
}

/// Approve or reject a pending audit.
///
/// Approval stamps `end_time` with the local wall clock and approves every
/// form of the audit. It is refused while a critical issue of the audit is
/// still open or in progress. Rejection leaves form statuses as they are.
pub fn review_audit(
    state: &AppState,
    audit_id: i64,
    decision: ReviewDecision,
    notes: Option<String>,
) -> Result<(AuditRecord, Vec<AuditFormRecord>), AppError> {
    let _guard = state.submissions.lock();
    if decision == ReviewDecision::Approve {
        let blocking = state.issues.count(|i| {
            i.audit_id == audit_id
                && i.severity == Severity::Critical
                && matches!(i.status, IssueStatus::Open | IssueStatus::InProgress)
        });
        if blocking > 0 {
            return Err(AppError::Conflict(format!(
                "audit {audit_id} has {blocking} unresolved critical issue(s)"
            )));
        }
    }
    let now = Utc::now();
    let end_time: NaiveDateTime = Local::now().naive_local();

    let audit = state
        .audits
        .try_update(&audit_id, |a| {
            a.status = a.status.transition_to(decision.target())?;
            if decision == ReviewDecision::Approve {
                a.end_time = Some(end_time);
            }
            if notes.is_some() {
                a.notes = notes;
            }
            a.updated_at = now;
            Ok::<_, AppError>(a.clone())
        })
        .ok_or_else(|| AppError::NotFound(format!("audit {audit_id} not found")))??;

    let forms = if decision == ReviewDecision::Approve {
        state.audit_forms.update_where(
            |f| f.audit_id == audit_id,
            |f| {
                f.status = RecordStatus::Approved;
                f.updated_at = now;
            },
        )
    } else {
        Vec::new()
    };

    Ok((audit, forms))
}

/// Approve or reject one pending audit form.
pub fn review_form(
    state: &AppState,
    form_id: i64,
    decision: ReviewDecision,
) -> Result<AuditFormRecord, AppError> {
    state
        .audit_forms
        .try_update(&form_id, |f| {
            f.status = f.status.transition_to(decision.target())?;
            f.updated_at = Utc::now();
            Ok::<_, AppError>(f.clone())
        })
        .ok_or_else(|| AppError::NotFound(format!("audit form {form_id} not found")))?
}
