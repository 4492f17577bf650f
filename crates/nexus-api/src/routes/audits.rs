//! # Audits API
//!
//! Outlet users start audits against a compliance requirement, fill in its
//! forms, and submit the audit for review. Callers holding `view-audits`
//! see every audit; everyone else sees only the audits they started.
//!
//! The due date is fixed when the audit is created, from its start time and
//! the requirement's frequency.

use std::str::FromStr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Local, NaiveDateTime, Utc};
use nexus_core::access::abilities;
use nexus_core::RecordStatus;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::auth::{require_ability, CallerIdentity};
use crate::error::{AppError, Violations};
use crate::extractors::{extract_json, extract_validated_json, Validate};
use crate::orchestration::{self, ReviewDecision};
use crate::routes::PaginationParams;
use crate::state::{AppState, AuditFormRecord, AuditRecord, IssueRecord};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAuditRequest {
    pub compliance_id: i64,
    pub outlet_id: i64,
    /// Wall-clock start; defaults to now.
    #[schema(example = "2024-03-10T09:00:00")]
    pub start_time: Option<NaiveDateTime>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReviewAuditRequest {
    pub decision: ReviewDecision,
    /// Reviewer feedback, stored on the audit.
    pub notes: Option<String>,
}

impl Validate for ReviewAuditRequest {
    fn validate(&self, v: &mut Violations) {
        v.check(
            self.decision == ReviewDecision::Reject
                && self.notes.as_deref().map_or(true, |n| n.trim().is_empty()),
            "notes",
            "The notes field is required when rejecting an audit.",
        );
    }
}

/// Filters for audit listings.
#[derive(Debug, Deserialize, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditFilter {
    /// Lifecycle status name.
    pub status: Option<String>,
    pub outlet_id: Option<i64>,
    pub compliance_id: Option<i64>,
    /// Starting user; only honoured for callers with `view-audits`.
    pub user_id: Option<i64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AuditFilter {
    fn pagination(&self) -> PaginationParams {
        PaginationParams {
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// An audit with its submitted forms and the findings raised against it.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuditDetail {
    pub audit: AuditRecord,
    pub compliance_title: Option<String>,
    pub outlet_name: Option<String>,
    pub forms: Vec<AuditFormRecord>,
    pub issues: Vec<IssueRecord>,
}

/// Mobile audit routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/audits", get(list_audits).post(create_audit))
        .route("/api/audits/:id", get(get_audit).delete(delete_audit))
        .route("/api/audits/:id/submit", post(submit_audit))
        .route("/api/audits/:id/forms", get(list_audit_forms))
}

/// Review routes.
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/audits", get(admin_list_audits))
        .route("/admin/audits/:id", get(get_audit))
        .route("/admin/audits/:id/review", post(review_audit))
}

// -- Helpers ------------------------------------------------------------------

/// Load an audit the caller started, or any audit when they hold `elevated`.
pub(crate) fn load_audit_for(
    state: &AppState,
    caller: &CallerIdentity,
    audit_id: i64,
    elevated: &str,
) -> Result<AuditRecord, AppError> {
    let audit = state
        .audits
        .get(&audit_id)
        .ok_or_else(|| AppError::NotFound(format!("audit {audit_id} not found")))?;
    if audit.user_id != caller.user_id && !caller.can(elevated) {
        return Err(AppError::Forbidden(format!(
            "audit {audit_id} belongs to another user"
        )));
    }
    Ok(audit)
}

/// Write the current in-memory audit through to Postgres.
///
/// Runs under [`AppState::audit_writes`] and re-reads the record after
/// taking it, so the database receives rows in the order the store applied
/// them. An audit deleted in the meantime is skipped. Returns the snapshot
/// that was written.
pub(crate) async fn persist_audit(state: &AppState, audit: &AuditRecord) -> Option<AuditRecord> {
    let _writes = state.audit_writes.lock().await;
    let Some(current) = state.audits.get(&audit.id) else {
        tracing::debug!(audit_id = audit.id, "audit deleted before write-through; skipping");
        return None;
    };
    crate::db::write_through(state.db_pool.as_ref(), "audit", current.id, |pool| {
        crate::db::audits::upsert(pool, &current)
    })
    .await;
    Some(current)
}

/// Write the current in-memory copies of `forms` through to Postgres.
///
/// Same ordering rules as [`persist_audit`]; forms whose row or audit is
/// gone are skipped.
pub(crate) async fn persist_forms(
    state: &AppState,
    forms: &[AuditFormRecord],
) -> Vec<AuditFormRecord> {
    let _writes = state.audit_writes.lock().await;
    let mut written = Vec::with_capacity(forms.len());
    for form in forms {
        let Some(current) = state.audit_forms.get(&form.id) else {
            continue;
        };
        if !state.audits.contains(&current.audit_id) {
            continue;
        }
        crate::db::write_through(state.db_pool.as_ref(), "audit_form", current.id, |pool| {
            crate::db::audit_forms::upsert(pool, &current)
        })
        .await;
        written.push(current);
    }
    written
}

fn detail(state: &AppState, audit: AuditRecord) -> AuditDetail {
    let forms = state.audit_forms.filter(|f| f.audit_id == audit.id);
    let issues = state.issues.filter(|i| i.audit_id == audit.id);
    AuditDetail {
        compliance_title: state
            .compliance_requirements
            .get(&audit.compliance_id)
            .map(|c| c.title),
        outlet_name: state.outlets.get(&audit.outlet_id).map(|o| o.name),
        forms,
        issues,
        audit,
    }
}

fn filtered(
    state: &AppState,
    filter: &AuditFilter,
    only_user: Option<i64>,
) -> Result<Vec<AuditRecord>, AppError> {
    let status = filter
        .status
        .as_deref()
        .map(RecordStatus::from_str)
        .transpose()?;
    let user = only_user.or(filter.user_id);
    let audits = state.audits.filter(|a| {
        status.map_or(true, |s| a.status == s)
            && filter.outlet_id.map_or(true, |id| a.outlet_id == id)
            && filter.compliance_id.map_or(true, |id| a.compliance_id == id)
            && user.map_or(true, |id| a.user_id == id)
    });
    Ok(filter.pagination().apply(audits))
}

// -- Handlers -----------------------------------------------------------------

/// POST /api/audits: Start an audit.
#[utoipa::path(
    post,
    path = "/api/audits",
    request_body = CreateAuditRequest,
    responses(
        (status = 201, description = "Audit created", body = AuditRecord),
        (status = 403, description = "Outlet not assigned to caller", body = crate::error::ErrorBody),
        (status = 422, description = "Unknown requirement or outlet", body = crate::error::ErrorBody),
    ),
    tag = "audits"
)]
pub(crate) async fn create_audit(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateAuditRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuditRecord>), AppError> {
    require_ability(&caller, abilities::CREATE_AUDITS)?;
    let req = extract_json(body)?;

    let requirement = state
        .compliance_requirements
        .get(&req.compliance_id)
        .filter(|c| c.is_active);
    let outlet = state.outlets.get(&req.outlet_id).filter(|o| o.is_active);

    let mut v = Violations::new();
    v.check(
        requirement.is_none(),
        "compliance_id",
        "The selected compliance id is invalid.",
    );
    v.check(outlet.is_none(), "outlet_id", "The selected outlet id is invalid.");
    v.into_result()?;
    let (Some(requirement), Some(outlet)) = (requirement, outlet) else {
        return Err(AppError::Internal("validated records missing".into()));
    };

    if outlet.outlet_user_id != Some(caller.user_id) && !caller.can(abilities::VIEW_AUDITS) {
        return Err(AppError::Forbidden(format!(
            "outlet {} is not assigned to you",
            outlet.id
        )));
    }

    let now = Utc::now();
    let local_now = Local::now().naive_local();
    let start_time = req.start_time.unwrap_or(local_now);
    let due_date = state.due_date_policy().due_date(
        Some(start_time),
        requirement.frequency.map(|f| f.as_str()),
        local_now,
    );

    let audit = state.audits.insert_with(|id| AuditRecord {
        id,
        compliance_id: requirement.id,
        outlet_id: outlet.id,
        user_id: caller.user_id,
        status: RecordStatus::Draft,
        start_time,
        end_time: None,
        due_date,
        progress: 0.0,
        notes: req.notes,
        created_at: now,
        updated_at: now,
    });

    persist_audit(&state, &audit).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "created",
        "audit",
        Some(audit.id),
        json!({ "compliance_id": audit.compliance_id, "outlet_id": audit.outlet_id }),
    )
    .await;
    tracing::info!(audit_id = audit.id, due_date = %audit.due_date, "audit started");

    Ok((StatusCode::CREATED, Json(audit)))
}

/// GET /api/audits: The caller's audits (all audits with `view-audits`).
#[utoipa::path(
    get,
    path = "/api/audits",
    params(AuditFilter),
    responses((status = 200, description = "Audits", body = Vec<AuditRecord>)),
    tag = "audits"
)]
pub(crate) async fn list_audits(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<Vec<AuditRecord>>, AppError> {
    let only_user = if caller.can(abilities::VIEW_AUDITS) {
        None
    } else {
        Some(caller.user_id)
    };
    Ok(Json(filtered(&state, &filter, only_user)?))
}

/// GET /admin/audits: Every audit, filtered.
#[utoipa::path(
    get,
    path = "/admin/audits",
    params(AuditFilter),
    responses((status = 200, description = "Audits", body = Vec<AuditRecord>)),
    tag = "audits"
)]
pub(crate) async fn admin_list_audits(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<Vec<AuditRecord>>, AppError> {
    require_ability(&caller, abilities::VIEW_AUDITS)?;
    Ok(Json(filtered(&state, &filter, None)?))
}

/// GET /api/audits/{id}: An audit with its forms and issues.
#[utoipa::path(
    get,
    path = "/api/audits/{id}",
    params(("id" = i64, Path, description = "Audit ID")),
    responses(
        (status = 200, description = "Audit found", body = AuditDetail),
        (status = 403, description = "Not the caller's audit", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "audits"
)]
pub(crate) async fn get_audit(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<Json<AuditDetail>, AppError> {
    let audit = load_audit_for(&state, &caller, id, abilities::VIEW_AUDITS)?;
    Ok(Json(detail(&state, audit)))
}

/// GET /api/audits/{id}/forms: Submitted forms of an audit.
#[utoipa::path(
    get,
    path = "/api/audits/{id}/forms",
    params(("id" = i64, Path, description = "Audit ID")),
    responses(
        (status = 200, description = "Audit forms", body = Vec<AuditFormRecord>),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "audits"
)]
pub(crate) async fn list_audit_forms(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<Json<Vec<AuditFormRecord>>, AppError> {
    let audit = load_audit_for(&state, &caller, id, abilities::VIEW_AUDITS)?;
    Ok(Json(state.audit_forms.filter(|f| f.audit_id == audit.id)))
}

/// DELETE /api/audits/{id}: Delete a draft audit with its forms and issues.
#[utoipa::path(
    delete,
    path = "/api/audits/{id}",
    params(("id" = i64, Path, description = "Audit ID")),
    responses(
        (status = 204, description = "Audit deleted"),
        (status = 403, description = "Audit is not a draft", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "audits"
)]
pub(crate) async fn delete_audit(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let audit = {
        let _guard = state.submissions.lock();
        let audit = load_audit_for(&state, &caller, id, abilities::REVIEW_AUDITS)?;
        if audit.status != RecordStatus::Draft {
            return Err(AppError::Forbidden(format!(
                "audit {id} is {} and can only be deleted as a draft",
                audit.status
            )));
        }
        state.audits.remove(&id);
        audit
    };

    let forms = state.audit_forms.remove_where(|f| f.audit_id == id);
    let issues = state.issues.remove_where(|i| i.audit_id == id);
    let issue_ids: Vec<i64> = issues.iter().map(|i| i.id).collect();
    state
        .corrective_actions
        .remove_where(|c| issue_ids.contains(&c.issue_id));

    {
        let _writes = state.audit_writes.lock().await;
        crate::db::write_through(state.db_pool.as_ref(), "audit", id, |pool| {
            crate::db::audits::delete(pool, id)
        })
        .await;
    }
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "deleted",
        "audit",
        Some(id),
        json!({
            "compliance_id": audit.compliance_id,
            "outlet_id": audit.outlet_id,
            "forms_removed": forms.len(),
            "issues_removed": issues.len(),
        }),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/audits/{id}/submit: Submit an audit for review.
#[utoipa::path(
    post,
    path = "/api/audits/{id}/submit",
    params(("id" = i64, Path, description = "Audit ID")),
    responses(
        (status = 200, description = "Audit pending review", body = AuditDetail),
        (status = 409, description = "Audit cannot be submitted in its status", body = crate::error::ErrorBody),
        (status = 422, description = "Forms missing", body = crate::error::ErrorBody),
    ),
    tag = "audits"
)]
pub(crate) async fn submit_audit(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
) -> Result<Json<AuditDetail>, AppError> {
    let owner = state
        .audits
        .get(&id)
        .map(|a| a.user_id)
        .ok_or_else(|| AppError::NotFound(format!("audit {id} not found")))?;
    if owner != caller.user_id {
        return Err(AppError::Forbidden(format!("audit {id} belongs to another user")));
    }

    let (audit, forms) = orchestration::submit_audit(&state, id)?;
    persist_audit(&state, &audit).await;
    persist_forms(&state, &forms).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        "submitted",
        "audit",
        Some(id),
        json!({ "progress": audit.progress }),
    )
    .await;

    Ok(Json(detail(&state, audit)))
}

/// POST /admin/audits/{id}/review: Approve or reject a pending audit.
#[utoipa::path(
    post,
    path = "/admin/audits/{id}/review",
    params(("id" = i64, Path, description = "Audit ID")),
    request_body = ReviewAuditRequest,
    responses(
        (status = 200, description = "Audit reviewed", body = AuditDetail),
        (status = 409, description = "Audit is not pending", body = crate::error::ErrorBody),
    ),
    tag = "audits"
)]
pub(crate) async fn review_audit(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<i64>,
    body: Result<Json<ReviewAuditRequest>, JsonRejection>,
) -> Result<Json<AuditDetail>, AppError> {
    require_ability(&caller, abilities::REVIEW_AUDITS)?;
    let req = extract_validated_json(body)?;

    let (audit, forms) = orchestration::review_audit(&state, id, req.decision, req.notes)?;
    persist_audit(&state, &audit).await;
    persist_forms(&state, &forms).await;
    crate::activity::record(
        &state,
        Some(caller.user_id),
        match req.decision {
            ReviewDecision::Approve => "approved",
            ReviewDecision::Reject => "rejected",
        },
        "audit",
        Some(id),
        json!({ "notes": audit.notes }),
    )
    .await;
    tracing::info!(audit_id = id, status = %audit.status, reviewer = caller.user_id, "audit reviewed");

    Ok(Json(detail(&state, audit)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft_audit(state: &AppState) -> AuditRecord {
        let now = Utc::now();
        let start =
            NaiveDateTime::parse_from_str("2024-03-10 09:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        state.audits.insert_with(|id| AuditRecord {
            id,
            compliance_id: 1,
            outlet_id: 1,
            user_id: 1,
            status: RecordStatus::Draft,
            start_time: start,
            end_time: None,
            due_date: start,
            progress: 0.0,
            notes: None,
            created_at: now,
            updated_at: now,
        })
    }

    #[tokio::test]
    async fn write_through_uses_the_latest_audit() {
        let state = AppState::new();
        let stale = draft_audit(&state);
        state.audits.update(&stale.id, |a| {
            a.progress = 100.0;
            a.updated_at = Utc::now();
        });

        let written = persist_audit(&state, &stale).await.unwrap();
        assert_eq!(written.progress, 100.0);
    }

    #[tokio::test]
    async fn write_through_skips_deleted_audits() {
        let state = AppState::new();
        let audit = draft_audit(&state);
        let now = Utc::now();
        let form = state.audit_forms.insert_with(|id| AuditFormRecord {
            id,
            audit_id: audit.id,
            form_id: 1,
            name: "Morning check".into(),
            value: json!({}),
            status: RecordStatus::Draft,
            created_at: now,
            updated_at: now,
        });
        state.audits.remove(&audit.id);

        assert!(persist_audit(&state, &audit).await.is_none());
        assert!(persist_forms(&state, &[form]).await.is_empty());
    }
}
